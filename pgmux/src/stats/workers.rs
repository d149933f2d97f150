//! Engine counters as OpenMetrics.

use std::fmt::Display;

use pgmux_stats::ProxyState;

use super::{Measurement, Metric, OpenMetric, Registry};

struct WorkerMetric {
    name: &'static str,
    help: &'static str,
    counter: bool,
    measurements: Vec<Measurement>,
}

impl OpenMetric for WorkerMetric {
    fn name(&self) -> String {
        self.name.into()
    }

    fn measurements(&self) -> Vec<Measurement> {
        self.measurements.clone()
    }

    fn metric_type(&self) -> String {
        if self.counter {
            "counter".into()
        } else {
            "gauge".into()
        }
    }

    fn help(&self) -> Option<String> {
        Some(self.help.into())
    }
}

/// Name, help, counter or gauge, value.
fn fields(s: &ProxyState) -> [(&'static str, &'static str, bool, u64); 10] {
    [
        ("clients", "Connected clients.", false, s.clients as u64),
        (
            "ssl_clients",
            "Clients using an encrypted transport.",
            false,
            s.ssl_clients as u64,
        ),
        ("pools", "Session pools.", false, s.pools as u64),
        ("backends", "Open backend connections.", false, s.backends as u64),
        (
            "dedicated_backends",
            "Backends that won't be shared again.",
            false,
            s.dedicated_backends as u64,
        ),
        (
            "idle_backends",
            "Backends in an idle list.",
            false,
            s.idle_backends as u64,
        ),
        (
            "idle_clients",
            "Clients without a request in flight.",
            false,
            s.idle_clients as u64,
        ),
        ("tx_bytes", "Bytes sent to clients.", true, s.tx_bytes),
        ("rx_bytes", "Bytes sent to backends.", true, s.rx_bytes),
        ("transactions", "Completed transactions.", true, s.transactions),
    ]
}

/// One metric family per counter, one sample per worker.
pub struct Workers {
    metrics: Vec<Metric>,
}

impl Workers {
    pub fn load(registry: &Registry) -> Self {
        Self::from_states(&registry.snapshot())
    }

    fn from_states(states: &[ProxyState]) -> Self {
        let template = fields(&ProxyState::default());
        let samples = states.iter().map(fields).collect::<Vec<_>>();

        let metrics = template
            .iter()
            .enumerate()
            .map(|(index, (name, help, counter, _))| {
                let measurements = samples
                    .iter()
                    .enumerate()
                    .map(|(worker, fields)| Measurement {
                        labels: vec![("worker".into(), format!("\"{}\"", worker))],
                        measurement: fields[index].3.into(),
                    })
                    .collect();

                Metric::new(WorkerMetric {
                    name: *name,
                    help: *help,
                    counter: *counter,
                    measurements,
                })
            })
            .collect();

        Self { metrics }
    }
}

impl Display for Workers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for metric in &self.metrics {
            write!(f, "{}", metric)?;
        }
        Ok(())
    }
}
