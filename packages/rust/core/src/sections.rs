//! The 13 section shapes, their registry, and the aggregate form.
//!
//! Section order is fixed: location first (its jurisdiction feeds every
//! later query), then the twelve sign-code topics. [`SectionSlot::ALL`] is
//! the single source of that order; [`CodeCheckForm`] has one named field
//! per slot and [`CodeCheckForm::assign`] maps a [`SectionDocument`] onto it
//! by match, never by field-name lookup.

use codecheck_shared::{CodeCheckError, Result, SECTION_COUNT, SectionResultRecord};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::provenance::ResearchedField;

pub type TextField = ResearchedField<String>;
pub type FlagField = ResearchedField<bool>;
pub type NumberField = ResearchedField<f64>;
pub type CountField = ResearchedField<i64>;
pub type ListField = ResearchedField<Vec<String>>;

/// Form name used when none is given.
pub const DEFAULT_FORM_NAME: &str = "Code Check Form";

/// A statically known section shape.
pub trait Section:
    Default + Serialize + DeserializeOwned + JsonSchema + Send + Sync + 'static
{
    const SLOT: SectionSlot;

    fn into_document(self) -> SectionDocument;
}

// ---------------------------------------------------------------------------
// Section shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MunicipalContact {
    pub name: TextField,
    pub title: TextField,
    pub phone: TextField,
    pub fax: TextField,
    pub email: TextField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LocationInformation {
    pub site_name: TextField,
    pub site_address: TextField,
    pub city: TextField,
    pub state: TextField,
    pub zip: TextField,
    /// City or county whose code governs the site.
    pub jurisdiction: TextField,
    /// Zoning designation, e.g. `C-1`.
    pub zoning: TextField,
    pub pud_overlays: FlagField,
    pub approved_csp: FlagField,
    pub csp_required: FlagField,
    /// Link to the municipal code or zoning ordinance.
    pub municipal_website: TextField,
    pub municipal_contact: MunicipalContact,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct NumberOfSignsAllowed {
    pub secondary: CountField,
    pub side: CountField,
    pub rear: CountField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct WallSigns {
    pub wall_signs_allowed: FlagField,
    pub square_footage_based_on: TextField,
    pub maximum_sf_allowed: NumberField,
    pub sf_allowed_front: NumberField,
    pub maximum_height_from_grade: NumberField,
    pub can_project_above_roofline: FlagField,
    pub project_above_roofline_amount: TextField,
    pub illumination_restrictions: TextField,
    pub material_restrictions: TextField,
    pub color_restrictions: TextField,
    pub sign_area_calculation_formula: TextField,
    pub per_site: TextField,
    pub max_letter_height: NumberField,
    pub max_logo_height: NumberField,
    pub max_sign_width: NumberField,
    pub number_of_signs_allowed_per_elevation: NumberOfSignsAllowed,
    pub maximum_projection: NumberField,
    pub is_area_transferable_to_another_elevation: FlagField,
    pub permits_required_for_repaint_signage: FlagField,
    pub permits_required_for_non_illuminated_wall_signs: FlagField,
    pub notes_wall_signs: TextField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProjectingSigns {
    pub projecting_signs_allowed: FlagField,
    /// Whether the sign may extend over the public right-of-way.
    pub allowed_over_public_row: FlagField,
    pub maximum_projection: NumberField,
    pub maximum_area: NumberField,
    pub color_font_logo_restrictions: TextField,
    pub height_restrictions: TextField,
    pub minimum_clearance: NumberField,
    pub illumination_restrictions: TextField,
    pub maximum_number: CountField,
    pub feet_from_property_line: NumberField,
    pub clearance_to_grade: NumberField,
    pub sf_restrictions: TextField,
    pub notes_projecting_signs: TextField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FreestandingSigns {
    pub freestanding_signs_allowed: FlagField,
    pub square_footage_formula: TextField,
    pub minimum_setback_from_other_freestanding: NumberField,
    pub how_is_sign_area_calculated: TextField,
    pub max_area: NumberField,
    pub max_height: NumberField,
    pub setback: NumberField,
    pub max_number: CountField,
    pub measured_from: TextField,
    pub restriction_on_placement: TextField,
    pub color_font_logo_restrictions: TextField,
    pub minimum_vision_clearance: TextField,
    pub windload_requirements: TextField,
    pub faces_counted_toward_total_area_allowance: TextField,
    pub support_structure_counted_in_area: FlagField,
    pub illumination_restrictions: TextField,
    pub sight_triangle_requirements: TextField,
    pub material_restrictions: TextField,
    pub multi_tenant_panel_allowed: FlagField,
    pub multi_tenant_space_tenant_will_occupy: TextField,
    pub notes_freestanding_signs: TextField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DirectionalsRegulatory {
    pub directionals_allowed: FlagField,
    pub permits_required: FlagField,
    pub number_of_signs_allowed: CountField,
    pub maximum_sf_allowed: NumberField,
    pub style_restrictions: TextField,
    pub maximum_area: NumberField,
    pub material_restrictions: TextField,
    pub maximum_overall_height: NumberField,
    pub directionals_count_towards_allowed_sf: FlagField,
    pub customer_parking_signs_restricted: FlagField,
    pub corporate_colors_logos_allowed: FlagField,
    pub placement_restrictions: TextField,
    pub notes_directionals: TextField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct InformationalSigns {
    pub informational_signs_allowed: FlagField,
    pub permits_required: FlagField,
    pub number_of_signs_allowed: CountField,
    pub maximum_sf_allowed: NumberField,
    pub style_restrictions: TextField,
    pub maximum_area: NumberField,
    pub material_restrictions: TextField,
    pub maximum_overall_height: NumberField,
    pub directionals_count_towards_allowed_sf: FlagField,
    pub customer_parking_signs_restricted: FlagField,
    pub corporate_colors_logos_allowed: FlagField,
    pub placement_restrictions: TextField,
    pub color_font_logo_restrictions: TextField,
    pub notes_informational: TextField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Awnings {
    pub awnings_allowed: FlagField,
    pub allowed_above_first_story: FlagField,
    pub height_restrictions: TextField,
    pub corporate_colors_allowed: FlagField,
    pub clearance_from_grade_to_bottom: NumberField,
    pub overhang_of_row_allowed: FlagField,
    pub max_area: NumberField,
    pub notes_awnings: TextField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct UndercanopySigns {
    pub undercanopy_signs_allowed: FlagField,
    pub counts_toward_wall_sign_allowance: FlagField,
    pub copy_area_counted_total_allotment: FlagField,
    pub how_is_copy_area_measured: TextField,
    pub minimum_clearance: NumberField,
    pub restrictions_on_placement_lettering_logos: TextField,
    pub max_area: NumberField,
    pub max_number: CountField,
    pub copy_logo_allowed: FlagField,
    pub illumination_allowed: FlagField,
    pub notes_undercanopy: TextField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct WindowSigns {
    pub window_signs_allowed: FlagField,
    pub illumination_allowed: FlagField,
    pub minimum_clearance: NumberField,
    pub permits_required: FlagField,
    pub max_area: NumberField,
    pub area_counts_toward_total_allowance: FlagField,
    pub color_logo_restrictions: TextField,
    pub vinyl_graphics_application_considered: FlagField,
    pub setback_from_glass_exempt: FlagField,
    pub how_is_area_calculated: TextField,
    pub how_far_away_must_they_be: TextField,
    pub notes_window_signs: TextField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TemporarySigns {
    pub temporary_banner_signs_allowed: FlagField,
    pub allowable_timeframe: TextField,
    pub placement_restrictions: TextField,
    pub permit_required: FlagField,
    pub material_restrictions: TextField,
    pub copy_restrictions: TextField,
    pub size_coverage_allowed: TextField,
    pub maximum_number: CountField,
    pub maximum_area: NumberField,
    pub color_font_logo_restrictions: TextField,
    pub temporary_text_allowed_on_windows: FlagField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ApprovalProcess {
    pub design_review_required: FlagField,
    pub design_review_handled_administratively_or_meeting: TextField,
    pub meeting_required_must_attend: FlagField,
    pub will_we_present_proposal: FlagField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PermitRequirements {
    pub permits_can_be_applied_via: ListField,
    pub persons_who_can_apply_for_permits: ListField,
    pub license_required_for: ListField,
    pub signature_required_on_application_by: ListField,
    pub documents_required: ListField,
    pub number_of_document_copies: CountField,
    pub document_size: TextField,
    pub time_to_secure_permit: TextField,
    /// Documentation needed for electronic message centers.
    pub documentation_required_for_emc: TextField,
    pub cost_of_permit: TextField,
    pub electrical_permit_required_for_illuminated_signs: FlagField,
    pub notes_permit_requirements: TextField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct VarianceProcedures {
    pub variances_allowed: FlagField,
    pub likelihood_of_variance_being_approved: TextField,
    pub variance_can_be_applied_for_by: ListField,
    pub signature_required_on_application: ListField,
    pub must_attend_variance_hearing: ListField,
    pub documents_required: ListField,
    pub quantity_required: TextField,
    pub document_color: TextField,
    pub time_to_secure_variance: TextField,
    pub board: TextField,
    pub document_size: TextField,
    pub cost_of_variance: TextField,
    pub deadline: TextField,
    pub meeting_date: TextField,
    pub percent_approved: TextField,
    pub notes_variance_procedures: TextField,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Generates the slot enum, the tagged document enum, the aggregate form
/// and the [`Section`] impls from one ordered list, so they cannot drift.
macro_rules! section_registry {
    ($( $variant:ident => $ty:ident, $field:ident, $topic:literal, $label:literal; )+) => {
        /// One entry of the fixed, ordered section registry.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum SectionSlot {
            $( $variant, )+
        }

        impl SectionSlot {
            /// Every slot, in processing order.
            pub const ALL: [SectionSlot; SECTION_COUNT] = [$( SectionSlot::$variant, )+];

            /// Output slot name, also the stored `section_name`.
            pub fn slot_name(&self) -> &'static str {
                match self {
                    $( Self::$variant => stringify!($field), )+
                }
            }

            /// Topic name used in research queries.
            pub fn topic(&self) -> &'static str {
                match self {
                    $( Self::$variant => $topic, )+
                }
            }

            /// Short label used in exported rows.
            pub fn export_label(&self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }
        }

        /// A researched section, tagged with its slot.
        #[derive(Debug, Clone, PartialEq)]
        pub enum SectionDocument {
            $( $variant($ty), )+
        }

        impl SectionDocument {
            pub fn slot(&self) -> SectionSlot {
                match self {
                    $( Self::$variant(_) => SectionSlot::$variant, )+
                }
            }

            /// The all-absent document for a slot.
            pub fn empty(slot: SectionSlot) -> Self {
                match slot {
                    $( SectionSlot::$variant => Self::$variant(<$ty>::default()), )+
                }
            }

            /// Serialize the inner section for storage.
            pub fn to_value(&self) -> Result<Value> {
                let value = match self {
                    $( Self::$variant(doc) => serde_json::to_value(doc), )+
                };
                value.map_err(|e| CodeCheckError::parse(format!("serialize {}: {e}", self.slot())))
            }

            /// Decode stored or extracted data into the slot's shape.
            pub fn from_value(slot: SectionSlot, value: Value) -> Result<Self> {
                let doc = match slot {
                    $( SectionSlot::$variant => serde_json::from_value::<$ty>(value).map(Self::$variant), )+
                };
                doc.map_err(|e| CodeCheckError::shape(format!("{slot}: {e}")))
            }
        }

        $(
            impl Section for $ty {
                const SLOT: SectionSlot = SectionSlot::$variant;

                fn into_document(self) -> SectionDocument {
                    SectionDocument::$variant(self)
                }
            }
        )+

        /// The complete result of one research run: one document per slot.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
        #[serde(default)]
        pub struct CodeCheckForm {
            pub form_name: String,
            pub completed_by: Option<String>,
            pub date_completed: Option<String>,
            $( pub $field: $ty, )+
        }

        impl Default for CodeCheckForm {
            fn default() -> Self {
                Self {
                    form_name: DEFAULT_FORM_NAME.to_string(),
                    completed_by: None,
                    date_completed: None,
                    $( $field: <$ty>::default(), )+
                }
            }
        }

        impl CodeCheckForm {
            /// Store a document in its slot, replacing what was there.
            pub fn assign(&mut self, doc: SectionDocument) {
                match doc {
                    $( SectionDocument::$variant(d) => self.$field = d, )+
                }
            }

            /// A copy of the document in `slot`.
            pub fn section(&self, slot: SectionSlot) -> SectionDocument {
                match slot {
                    $( SectionSlot::$variant => SectionDocument::$variant(self.$field.clone()), )+
                }
            }
        }
    };
}

section_registry! {
    LocationInformation => LocationInformation, location_information, "Location Information", "Location Info";
    WallSigns => WallSigns, wall_signs, "Wall Signs", "Wall Signs";
    ProjectingSigns => ProjectingSigns, projecting_signs, "Projecting Signs", "Projecting Signs";
    FreestandingSigns => FreestandingSigns, freestanding_signs, "Freestanding Signs", "Freestanding Signs";
    DirectionalsRegulatory => DirectionalsRegulatory, directionals_regulatory, "Directionals / Regulatory / Parking Lot", "Directionals";
    InformationalSigns => InformationalSigns, informational_signs, "Informational Signs", "Informational";
    Awnings => Awnings, awnings, "Awnings", "Awnings";
    UndercanopySigns => UndercanopySigns, undercanopy_signs, "Undercanopy Signs", "Undercanopy";
    WindowSigns => WindowSigns, window_signs, "Window Signs", "Window Signs";
    TemporarySigns => TemporarySigns, temporary_signs, "Temporary Signs", "Temporary Signs";
    ApprovalProcess => ApprovalProcess, approval_process, "Approval Process", "Approval Process";
    PermitRequirements => PermitRequirements, permit_requirements, "Permit Requirements", "Permit Requirements";
    VarianceProcedures => VarianceProcedures, variance_procedures, "Variance Procedures", "Variance Procedures";
}

impl SectionSlot {
    /// Extra detail appended to the topic query.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::WallSigns => Some(
                "Include details on allowed wall signs, square footage formulas, max height, \
                 illumination, materials, and calculation methods.",
            ),
            Self::FreestandingSigns => Some(
                "Include details on allowed freestanding/pylon signs, setbacks, max area, \
                 height, quantity, and multi-tenant rules.",
            ),
            _ => None,
        }
    }

    /// Position in processing order.
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0)
    }
}

impl std::fmt::Display for SectionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slot_name())
    }
}

impl std::str::FromStr for SectionSlot {
    type Err = CodeCheckError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|slot| slot.slot_name() == s)
            .ok_or_else(|| CodeCheckError::parse(format!("unknown section '{s}'")))
    }
}

impl CodeCheckForm {
    /// Rebuild a form from stored section records.
    ///
    /// Unknown or undecodable records are skipped with a warning; their
    /// slots stay empty.
    pub fn from_section_records(records: &[SectionResultRecord]) -> Self {
        let mut form = Self::default();
        for record in records {
            let slot = match record.section_name.parse::<SectionSlot>() {
                Ok(slot) => slot,
                Err(e) => {
                    warn!(job_id = %record.job_id, error = %e, "skipping stored section");
                    continue;
                }
            };
            match SectionDocument::from_value(slot, record.section_data.clone()) {
                Ok(doc) => form.assign(doc),
                Err(e) => {
                    warn!(job_id = %record.job_id, section = %slot, error = %e, "skipping stored section");
                }
            }
        }
        form
    }
}
