use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::workflow::processors::species::SpeciesMapping;
use crate::workflow::types::JobStatus;

/// Everything the review page needs: tagged images grouped by category plus
/// the labels for each category code.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogView {
    pub job: Option<Uuid>,
    pub status: Option<JobStatus>,
    pub categories: Vec<String>,
    pub categorized_images: BTreeMap<String, Vec<String>>,
    pub species_mapping: SpeciesMapping,
}

impl CatalogView {
    pub fn new(
        job: Option<(Uuid, JobStatus)>,
        categorized_images: BTreeMap<String, Vec<String>>,
        species_mapping: SpeciesMapping,
    ) -> Self {
        Self {
            job: job.map(|(id, _)| id),
            status: job.map(|(_, status)| status),
            categories: categorized_images.keys().cloned().collect(),
            categorized_images,
            species_mapping,
        }
    }
}
