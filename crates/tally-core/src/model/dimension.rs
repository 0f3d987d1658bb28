//! Slicing dimensions.

use serde::{Deserialize, Serialize};

use super::experiment::SnapshotSettings;

/// Dimension value used when a query is not sliced.
pub const ALL_DIMENSION_VALUE: &str = "All";
/// Bucket for experiment dimension values outside the specified slices.
pub const OTHER_DIMENSION_VALUE: &str = "__Other__";
/// Dimension value reported for units without a value.
pub const NULL_DIMENSION_VALUE: &str = "__NULL_DIMENSION";

/// A unit attribute defined by its own SQL (columns: identifier, `value`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDimension {
    pub id: String,
    pub sql: String,
}

/// A column on the exposure query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentDimension {
    pub id: String,
    /// When set, values outside this list are bucketed as `__Other__`.
    #[serde(default)]
    pub specified_slices: Option<Vec<String>>,
}

impl ExperimentDimension {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            specified_slices: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Dimension {
    User(UserDimension),
    Experiment(ExperimentDimension),
    /// Day of first exposure.
    Date,
    DateCumulative,
    DateDaily,
    /// Whether the unit reached the activation metric.
    Activation,
}

impl Dimension {
    pub fn user(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::User(UserDimension {
            id: id.into(),
            sql: sql.into(),
        })
    }

    pub fn experiment(id: impl Into<String>) -> Self {
        Self::Experiment(ExperimentDimension::new(id))
    }

    /// The `dimension_name` reported for rows sliced by this dimension.
    pub fn name(&self) -> String {
        match self {
            Self::User(d) => format!("dim_unit_{}", d.id),
            Self::Experiment(d) => format!("dim_exp_{}", d.id),
            Self::Date => "date".to_string(),
            Self::DateCumulative => "datecumulative".to_string(),
            Self::DateDaily => "datedaily".to_string(),
            Self::Activation => "activation".to_string(),
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, Self::Date | Self::DateCumulative | Self::DateDaily)
    }
}

/// Dimensions split by where their values come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessedDimensions {
    pub unit_dimensions: Vec<UserDimension>,
    pub experiment_dimensions: Vec<ExperimentDimension>,
    pub activation_dimension: bool,
    /// The first usable dimension; metric queries slice by this one only.
    pub slice: Option<Dimension>,
}

impl ProcessedDimensions {
    /// Keep the dimensions the snapshot can actually provide.
    ///
    /// Experiment dimensions must be declared on the exposure query and the
    /// activation dimension needs an activation metric. Anything else is
    /// dropped silently.
    pub fn process(dimensions: &[Dimension], settings: &SnapshotSettings) -> Self {
        let mut processed = Self::default();
        for dimension in dimensions {
            let usable = match dimension {
                Dimension::User(d) => {
                    processed.unit_dimensions.push(d.clone());
                    true
                }
                Dimension::Experiment(d) => {
                    let declared = settings.exposure_query.dimensions.contains(&d.id);
                    if declared {
                        processed.experiment_dimensions.push(d.clone());
                    }
                    declared
                }
                Dimension::Activation => {
                    let has_metric = settings.activation_metric.is_some();
                    processed.activation_dimension |= has_metric;
                    has_metric
                }
                Dimension::Date | Dimension::DateCumulative | Dimension::DateDaily => true,
            };
            if usable && processed.slice.is_none() {
                processed.slice = Some(dimension.clone());
            }
        }
        processed
    }
}
