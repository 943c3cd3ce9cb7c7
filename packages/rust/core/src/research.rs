//! One search-then-extract round trip per section.

use std::sync::Arc;

use codecheck_providers::{
    ExtractionShape, Extractor, PerplexityClient, SearchProvider, SearchResult, build_extractor,
};
use codecheck_shared::{AppConfig, CodeCheckError, LlmProvider, Result};
use tracing::{debug, info, instrument};

use crate::citations::CitationIndex;
use crate::sections::{
    ApprovalProcess, Awnings, DirectionalsRegulatory, FreestandingSigns, InformationalSigns,
    LocationInformation, PermitRequirements, ProjectingSigns, Section, SectionDocument,
    SectionSlot, TemporarySigns, UndercanopySigns, VarianceProcedures, WallSigns, WindowSigns,
};

/// System prompt for every search query.
pub const SEARCH_SYSTEM_PROMPT: &str = "You are a helpful research assistant.";

/// Stand-in when the location step found no jurisdiction.
pub const UNKNOWN_JURISDICTION: &str = "the local municipality";

const JURISDICTION_INSTRUCTIONS: &str = "Extract the location details. identify the 'Jurisdiction' (City/County name) \
and 'Zoning' (specific code like 'C-1' or 'Residential'). \
For 'municipal_website', find the link to the code/ordinance. \
For every field, find the specific source URL from the provided Citations list.";

/// Runs research steps against one search backend and one extraction backend.
pub struct ResearchAgent {
    search: Arc<dyn SearchProvider>,
    extractor: Arc<dyn Extractor>,
}

impl ResearchAgent {
    pub fn new(search: Arc<dyn SearchProvider>, extractor: Arc<dyn Extractor>) -> Self {
        Self { search, extractor }
    }

    /// Build the configured backends. Missing credentials fail here, before
    /// any request is made.
    pub fn from_config(config: &AppConfig, provider: LlmProvider) -> Result<Self> {
        let search = Arc::new(PerplexityClient::from_config(&config.perplexity)?);
        let extractor = build_extractor(provider, config)?;
        Ok(Self::new(search, extractor))
    }

    /// Name of the active extraction backend.
    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    /// Identify municipality, zoning and ordinance URL for an address.
    #[instrument(skip_all, fields(address = %address))]
    pub async fn research_jurisdiction(&self, address: &str) -> Result<LocationInformation> {
        let query = jurisdiction_query(address);
        let result = self.search.search(&query, SEARCH_SYSTEM_PROMPT).await?;
        let location: LocationInformation =
            self.extract_into(result, JURISDICTION_INSTRUCTIONS).await?;

        info!(
            jurisdiction = location.jurisdiction.value.as_deref().unwrap_or("unknown"),
            zoning = location.zoning.value.as_deref().unwrap_or("unknown"),
            "jurisdiction researched"
        );
        Ok(location)
    }

    /// Research one topic using the jurisdiction found earlier.
    #[instrument(skip_all, fields(section = %S::SLOT))]
    pub async fn research_section<S: Section>(
        &self,
        address: &str,
        location: &LocationInformation,
    ) -> Result<S> {
        let query = section_query(S::SLOT, address, location);
        let result = self.search.search(&query, SEARCH_SYSTEM_PROMPT).await?;
        self.extract_into(result, &section_instructions(S::SLOT))
            .await
    }

    /// Research the topic in `slot`, returning it as a tagged document.
    pub async fn research_slot(
        &self,
        slot: SectionSlot,
        address: &str,
        location: &LocationInformation,
    ) -> Result<SectionDocument> {
        let doc = match slot {
            SectionSlot::LocationInformation => self
                .research_jurisdiction(address)
                .await?
                .into_document(),
            SectionSlot::WallSigns => self
                .research_section::<WallSigns>(address, location)
                .await?
                .into_document(),
            SectionSlot::ProjectingSigns => self
                .research_section::<ProjectingSigns>(address, location)
                .await?
                .into_document(),
            SectionSlot::FreestandingSigns => self
                .research_section::<FreestandingSigns>(address, location)
                .await?
                .into_document(),
            SectionSlot::DirectionalsRegulatory => self
                .research_section::<DirectionalsRegulatory>(address, location)
                .await?
                .into_document(),
            SectionSlot::InformationalSigns => self
                .research_section::<InformationalSigns>(address, location)
                .await?
                .into_document(),
            SectionSlot::Awnings => self
                .research_section::<Awnings>(address, location)
                .await?
                .into_document(),
            SectionSlot::UndercanopySigns => self
                .research_section::<UndercanopySigns>(address, location)
                .await?
                .into_document(),
            SectionSlot::WindowSigns => self
                .research_section::<WindowSigns>(address, location)
                .await?
                .into_document(),
            SectionSlot::TemporarySigns => self
                .research_section::<TemporarySigns>(address, location)
                .await?
                .into_document(),
            SectionSlot::ApprovalProcess => self
                .research_section::<ApprovalProcess>(address, location)
                .await?
                .into_document(),
            SectionSlot::PermitRequirements => self
                .research_section::<PermitRequirements>(address, location)
                .await?
                .into_document(),
            SectionSlot::VarianceProcedures => self
                .research_section::<VarianceProcedures>(address, location)
                .await?
                .into_document(),
        };
        Ok(doc)
    }

    /// Annotate search content with its citations and extract `S` from it.
    /// Empty content yields `S::default()` without calling the extractor.
    async fn extract_into<S: Section>(&self, result: SearchResult, instructions: &str) -> Result<S> {
        if result.content.trim().is_empty() {
            debug!(section = %S::SLOT, "search returned no content, using empty section");
            return Ok(S::default());
        }

        let citations = CitationIndex::new(result.citations);
        let annotated = citations.annotate(&result.content);
        let shape = ExtractionShape::of::<S>(S::SLOT.slot_name());

        let mut value = self
            .extractor
            .extract(&annotated, &shape, instructions)
            .await?;
        let resolved = citations.normalize(&mut value);

        debug!(
            section = %S::SLOT,
            citations = citations.len(),
            resolved,
            extractor = self.extractor.name(),
            "section extracted"
        );
        serde_json::from_value::<S>(value)
            .map_err(|e| CodeCheckError::shape(format!("{}: {e}", S::SLOT)))
    }
}

/// Query for the location step.
pub fn jurisdiction_query(address: &str) -> String {
    format!(
        "What is the official municipality, zoning jurisdiction, and specific zoning designation \
         for the address: {address}? Also provide the URL for the municipal code or zoning ordinance."
    )
}

/// Query for a topic step, framed by the known jurisdiction and zoning.
pub fn section_query(slot: SectionSlot, address: &str, location: &LocationInformation) -> String {
    let jurisdiction = location
        .jurisdiction
        .value
        .as_deref()
        .filter(|j| !j.trim().is_empty())
        .unwrap_or(UNKNOWN_JURISDICTION);
    let zoning = location.zoning.value.as_deref().unwrap_or("");

    let mut query = format!(
        "For the address {address} in {jurisdiction} (Zoning: {zoning}), \
         what are the specific regulations for '{}'? ",
        slot.topic()
    );
    if let Some(hint) = slot.hint() {
        query.push_str(hint);
    }
    query
}

/// Extraction instructions for a topic step.
pub fn section_instructions(slot: SectionSlot) -> String {
    format!(
        "You are researching {}. Extract the specific regulations. \
         For every field, you MUST provide the 'source_url' from the citation list that supports your answer. \
         If a field is not explicitly mentioned in the text, leave it null/empty.",
        slot.topic()
    )
}
