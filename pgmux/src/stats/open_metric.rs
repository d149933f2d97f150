//! OpenMetrics text format.

use std::fmt::Display;
use std::ops::Deref;

/// A metric family: one name, one type, any number of labeled samples.
pub trait OpenMetric: Send + Sync {
    fn name(&self) -> String;

    fn measurements(&self) -> Vec<Measurement>;

    fn unit(&self) -> Option<String> {
        None
    }

    fn metric_type(&self) -> String {
        "gauge".into()
    }

    fn help(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementType {
    Integer(i64),
    Float(f64),
}

impl From<usize> for MeasurementType {
    fn from(value: usize) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<u64> for MeasurementType {
    fn from(value: u64) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<f64> for MeasurementType {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl Display for MeasurementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{:.3}", value),
        }
    }
}

/// One sample. Label values are written as given, quotes included.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub labels: Vec<(String, String)>,
    pub measurement: MeasurementType,
}

impl Measurement {
    pub fn render(&self, name: &str) -> String {
        let labels = self
            .labels
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>();

        if labels.is_empty() {
            format!("{} {}", name, self.measurement)
        } else {
            format!("{}{{{}}} {}", name, labels.join(","), self.measurement)
        }
    }
}

pub struct Metric {
    metric: Box<dyn OpenMetric>,
}

impl Metric {
    pub fn new(metric: impl OpenMetric + 'static) -> Self {
        Self {
            metric: Box::new(metric),
        }
    }
}

impl Deref for Metric {
    type Target = dyn OpenMetric;

    fn deref(&self) -> &Self::Target {
        self.metric.as_ref()
    }
}

impl Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.name();

        writeln!(f, "# TYPE {} {}", name, self.metric_type())?;
        if let Some(unit) = self.unit() {
            writeln!(f, "# UNIT {} {}", name, unit)?;
        }
        if let Some(help) = self.help() {
            writeln!(f, "# HELP {} {}", name, help)?;
        }

        for measurement in self.measurements() {
            writeln!(f, "{}", measurement.render(&name))?;
        }

        Ok(())
    }
}
