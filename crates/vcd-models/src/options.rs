//! Pipeline options and the canonical presets.
//!
//! A [`PipelineOptions`] value is taken once when a run starts and never
//! changes during it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default localization settings.
pub const DEFAULT_MAX_DETECTIONS: u32 = 10;
pub const DEFAULT_MIN_LENGTH_SECS: f64 = 5.0;
pub const DEFAULT_MISS_COST: f64 = -0.1;
pub const DEFAULT_RANK_WEIGHT: f64 = 0.99;

/// Segmentation plus descriptor choice for one side of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorOptions {
    /// Segmentation spec handed to the database tool (e.g. `SEGCTE_1/3`)
    pub segmentation: String,
    /// Directory name under `segmentations/`
    pub segmentation_alias: String,
    /// Descriptor spec handed to the database tool
    pub descriptor: String,
    /// Directory name under `descriptors/`
    pub descriptor_alias: String,
}

impl DescriptorOptions {
    pub fn new(
        segmentation: impl Into<String>,
        segmentation_alias: impl Into<String>,
        descriptor: impl Into<String>,
        descriptor_alias: impl Into<String>,
    ) -> Self {
        Self {
            segmentation: segmentation.into(),
            segmentation_alias: segmentation_alias.into(),
            descriptor: descriptor.into(),
            descriptor_alias: descriptor_alias.into(),
        }
    }

    /// Edge histogram over 1/3 s segments.
    pub fn global_ehd() -> Self {
        Self::new("SEGCTE_1/3", "033seg", "AVG_1U_EHD_4x4_8x8_5_K10_8F", "EH10P_033seg")
    }

    /// SIFT bag of visual words over 1/2 s segments.
    pub fn local_sift() -> Self {
        Self::new("SEGCTE_1/2", "05seg", "CV_SIFT_SIFT_UCHAR,BV900x150", "siftH150_05seg")
    }
}

/// How the similarity search treats descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// One vector per segment.
    #[default]
    Global,
    /// Many vectors per segment; neighbor lists need a merge stage.
    LocalVectors,
}

/// Similarity search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub distance: String,
    pub knn: u32,
    /// Index build spec (`-index`)
    pub index_build: String,
    /// Index search spec (`-searchOptions`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_search: Option<String>,
    /// Cache file name for a built index, stored with the reference descriptors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_file: Option<String>,
    #[serde(default)]
    pub mode: SearchMode,
    /// Neighbors kept after merging local vectors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knn_after_merge: Option<u32>,
}

impl SearchOptions {
    pub fn kdtree_global() -> Self {
        Self {
            distance: "L1".to_string(),
            knn: 3,
            index_build: "FLANN-KDTREE,num_trees=5".to_string(),
            index_search: Some("num_checks=100".to_string()),
            index_file: Some("kdtree-5-l1".to_string()),
            mode: SearchMode::Global,
            knn_after_merge: None,
        }
    }

    pub fn kdtree_local() -> Self {
        Self {
            distance: "L1".to_string(),
            knn: 10,
            index_build: "FLANN-KDTREE,num_trees=2".to_string(),
            index_search: Some("num_checks=100".to_string()),
            index_file: Some("kdtree-2-l1".to_string()),
            mode: SearchMode::LocalVectors,
            knn_after_merge: Some(3),
        }
    }

    /// Exhaustive search, no index.
    pub fn linear_scan_global() -> Self {
        Self {
            distance: "L1".to_string(),
            knn: 3,
            index_build: "LINEARSCAN".to_string(),
            index_search: None,
            index_file: None,
            mode: SearchMode::Global,
            knn_after_merge: None,
        }
    }

    pub fn laesa_global() -> Self {
        Self {
            distance: "L1".to_string(),
            knn: 3,
            index_build: "LAESA,num_pivots=5,sets_eval=8".to_string(),
            index_search: Some("method=APPROX,approximation=0.1".to_string()),
            index_file: Some("laesa-5-l1".to_string()),
            mode: SearchMode::Global,
            knn_after_merge: None,
        }
    }

    /// Exhaustive search with Lowe's ratio test.
    pub fn linear_scan_local() -> Self {
        Self {
            distance: "LOWE,0.8_L2".to_string(),
            knn: 3,
            index_build: "LINEARSCAN".to_string(),
            index_search: None,
            index_file: None,
            mode: SearchMode::Global,
            knn_after_merge: None,
        }
    }

    pub fn needs_merge(&self) -> bool {
        self.mode == SearchMode::LocalVectors
    }
}

/// Copy localization parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizationOptions {
    pub max_detections: u32,
    pub min_length_secs: f64,
    pub miss_cost: f64,
    pub rank_weight: f64,
}

impl Default for LocalizationOptions {
    fn default() -> Self {
        Self {
            max_detections: DEFAULT_MAX_DETECTIONS,
            min_length_secs: DEFAULT_MIN_LENGTH_SECS,
            miss_cost: DEFAULT_MISS_COST,
            rank_weight: DEFAULT_RANK_WEIGHT,
        }
    }
}

/// Frozen configuration for one detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub query_descriptor: DescriptorOptions,
    pub reference_descriptor: DescriptorOptions,
    pub search: SearchOptions,
    #[serde(default)]
    pub localization: LocalizationOptions,
}

impl PipelineOptions {
    /// Coarse search with global descriptors.
    pub fn global_preset() -> Self {
        Self {
            query_descriptor: DescriptorOptions::global_ehd(),
            reference_descriptor: DescriptorOptions::global_ehd(),
            search: SearchOptions::kdtree_global(),
            localization: LocalizationOptions::default(),
        }
    }

    /// Fine search with local descriptors.
    pub fn local_preset() -> Self {
        Self {
            query_descriptor: DescriptorOptions::local_sift(),
            reference_descriptor: DescriptorOptions::local_sift(),
            search: SearchOptions::kdtree_local(),
            localization: LocalizationOptions::default(),
        }
    }

    pub fn with_search(mut self, search: SearchOptions) -> Self {
        self.search = search;
        self
    }

    pub fn with_localization(mut self, localization: LocalizationOptions) -> Self {
        self.localization = localization;
        self
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::global_preset()
    }
}

/// Named preset selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Global,
    Local,
}

impl Preset {
    pub fn options(self) -> PipelineOptions {
        match self {
            Preset::Global => PipelineOptions::global_preset(),
            Preset::Local => PipelineOptions::local_preset(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Global => "global",
            Preset::Local => "local",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(Preset::Global),
            "local" => Ok(Preset::Local),
            other => Err(format!("unknown preset '{}', expected global or local", other)),
        }
    }
}
