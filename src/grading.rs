use serde::{Deserialize, Serialize};

/// Upper bound of the 20-point scale; thresholds at or below it are read as
/// belonging to that scale when a course stores no explicit scale.
pub const TWENTY_POINT_MAX: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeScale {
    Twenty,
    Hundred,
}

impl GradeScale {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "twenty" => Some(Self::Twenty),
            "hundred" => Some(Self::Hundred),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Twenty => "twenty",
            Self::Hundred => "hundred",
        }
    }

    pub fn infer(passing_threshold: f64) -> Self {
        if passing_threshold <= TWENTY_POINT_MAX {
            Self::Twenty
        } else {
            Self::Hundred
        }
    }

    pub fn max(self) -> f64 {
        match self {
            Self::Twenty => 20.0,
            Self::Hundred => 100.0,
        }
    }

    /// Width of the make-up window below the threshold: 15% of the scale.
    pub fn retake_band(self) -> f64 {
        match self {
            Self::Twenty => 3.0,
            Self::Hundred => 15.0,
        }
    }
}

/// Declared in rank order so `Ord` compares outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeStatus {
    Failed,
    RetakeEligible,
    Validated,
}

impl GradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::RetakeEligible => "retake_eligible",
            Self::Validated => "validated",
        }
    }
}

pub fn evaluate_status(grade: f64, passing_threshold: f64) -> GradeStatus {
    evaluate_status_on(grade, passing_threshold, GradeScale::infer(passing_threshold))
}

pub fn evaluate_status_on(grade: f64, passing_threshold: f64, scale: GradeScale) -> GradeStatus {
    if grade >= passing_threshold {
        GradeStatus::Validated
    } else if grade >= passing_threshold - scale.retake_band() {
        GradeStatus::RetakeEligible
    } else {
        GradeStatus::Failed
    }
}

/// Explicit scale wins over inference from the threshold magnitude.
pub fn effective_scale(passing_threshold: f64, explicit: Option<GradeScale>) -> GradeScale {
    explicit.unwrap_or_else(|| GradeScale::infer(passing_threshold))
}

/// `None` and `0` mean "not graded yet" and carry no status.
pub fn classify(
    grade: Option<f64>,
    passing_threshold: f64,
    scale: Option<GradeScale>,
) -> Option<GradeStatus> {
    let g = grade.filter(|g| *g != 0.0)?;
    Some(match scale {
        Some(scale) => evaluate_status_on(g, passing_threshold, scale),
        None => evaluate_status(g, passing_threshold),
    })
}
