//! Stage profiles: the instruction sets behind each pipeline stage

use std::fmt;
use std::sync::Arc;

use crate::llm::Message;
use crate::search::SearchTool;
use crate::tools::{ToolRegistry, WebSearchTool};

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Search,
    Synthesize,
    Write,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Search => "search",
            StageKind::Synthesize => "synthesize",
            StageKind::Write => "write",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable descriptor handed to the engine for one stage
#[derive(Debug, Clone)]
pub struct StageProfile {
    pub kind: StageKind,
    pub name: String,
    pub instructions: String,
    pub tools: ToolRegistry,
}

impl StageProfile {
    pub fn new(kind: StageKind, name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            instructions: instructions.into(),
            tools: ToolRegistry::new(),
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn system_message(&self) -> Message {
        Message::system(&self.instructions)
    }
}

pub const SEARCH_AGENT_NAME: &str = "Assistant de recherche sur le Web";
pub const RESEARCH_AGENT_NAME: &str = "Assistant de Recherches";
pub const WRITER_AGENT_NAME: &str = "Assistant Rédacteur";

const SEARCH_INSTRUCTIONS: &str = "Votre rôle est de rassembler les derniers articles d'actualité sur des sujets spécifiques en utilisant les capacités de recherche de DuckDuckGo.";

const RESEARCH_INSTRUCTIONS: &str = "Votre rôle est d'analyser et de synthétiser les résultats de recherche bruts. Vous devez :
    1. Supprimer les informations en double et le contenu redondant
    2. Identifier et fusionner les sujets et thèmes connexes
    3. Vérifier la cohérence des informations entre les sources
    4. Prioriser les informations récentes et pertinentes
    5. Extraire les faits, statistiques et citations clés
    6. Identifier les sources primaires lorsqu'elles sont disponibles
    7. Signaler toute information contradictoire
    8. Maintenir une attribution appropriée pour les affirmations importantes
    9. Organiser les informations dans une séquence logique
    10. Préserver le contexte important et les relations entre les sujets";

const WRITER_INSTRUCTIONS: &str = "Votre rôle est de transformer les résultats de recherche dédupliqués en un article soigné et prêt à être publié. Vous devez :
    1. Organiser le contenu en sections claires et thématiques
    2. Écrire sur un ton professionnel mais engageant, authentique et informatif
    3. Assurer une bonne fluidité entre les sujets
    4. Ajouter un contexte pertinent si nécessaire
    5. Maintenir l'exactitude des faits tout en rendant les sujets complexes accessibles
    6. Inclure un bref résumé au début
    7. Formater avec des titres et des sous-titres clairs
    8. Conserver toutes les informations clés du matériel source";

/// The three fixed profiles, built once at startup
#[derive(Debug, Clone)]
pub struct StageProfiles {
    pub search: StageProfile,
    pub synthesize: StageProfile,
    pub write: StageProfile,
}

impl StageProfiles {
    /// Build the profiles; the Search profile gets `web_search` bound to `search`
    pub fn new(search: Arc<SearchTool>) -> Self {
        let search_tools = ToolRegistry::new().with_tool(Arc::new(WebSearchTool::new(search)));

        Self {
            search: StageProfile::new(StageKind::Search, SEARCH_AGENT_NAME, SEARCH_INSTRUCTIONS)
                .with_tools(search_tools),
            synthesize: StageProfile::new(
                StageKind::Synthesize,
                RESEARCH_AGENT_NAME,
                RESEARCH_INSTRUCTIONS,
            ),
            write: StageProfile::new(StageKind::Write, WRITER_AGENT_NAME, WRITER_INSTRUCTIONS),
        }
    }

    pub fn get(&self, kind: StageKind) -> &StageProfile {
        match kind {
            StageKind::Search => &self.search,
            StageKind::Synthesize => &self.synthesize,
            StageKind::Write => &self.write,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::search::StaticSearchProvider;

    fn profiles() -> StageProfiles {
        let tool = SearchTool::new(
            Arc::new(StaticSearchProvider::default()),
            &SearchConfig::default(),
        );
        StageProfiles::new(Arc::new(tool))
    }

    #[test]
    fn only_search_stage_has_tools() {
        let profiles = profiles();
        assert_eq!(profiles.search.tools.names(), vec!["web_search"]);
        assert!(profiles.synthesize.tools.is_empty());
        assert!(profiles.write.tools.is_empty());
    }

    #[test]
    fn profiles_carry_their_stage() {
        let profiles = profiles();
        for kind in [StageKind::Search, StageKind::Synthesize, StageKind::Write] {
            assert_eq!(profiles.get(kind).kind, kind);
        }
        assert_eq!(profiles.write.name, "Assistant Rédacteur");
    }

    #[test]
    fn instructions_are_numbered_lists() {
        let profiles = profiles();
        assert!(profiles.synthesize.instructions.contains("\n    10. Préserver"));
        assert!(profiles.write.instructions.ends_with("matériel source"));
        assert_eq!(
            profiles.search.system_message().text(),
            SEARCH_INSTRUCTIONS
        );
    }
}
