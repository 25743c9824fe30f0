// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Aggregates component health for an external health check collaborator.
//!
//! Nothing here is served over HTTP; the checks only delegate to the
//! [`Healthy`] components they wrap.

use std::sync::Arc;

use crate::error::{Healthy, Unhealthy};

pub struct HealthCheck {
    pub name: String,
    pub severity: u8,
    pub business_impact: String,
    pub technical_summary: String,
    pub panic_guide: String,
    pub checker: Arc<dyn Healthy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub ok: bool,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoodToGo {
    pub good_to_go: bool,
    pub message: String,
}

pub struct HealthService {
    pub system_code: String,
    pub name: String,
    checks: Vec<HealthCheck>,
}

impl HealthService {
    pub fn new(system_code: String, name: String, checks: Vec<HealthCheck>) -> Self {
        Self {
            system_code,
            name,
            checks,
        }
    }

    /// The Splunk and S3 checks the forwarder process registers.
    pub fn forwarder_checks(
        splunk: Arc<dyn Healthy>,
        cache: Arc<dyn Healthy>,
        panic_guide: &str,
    ) -> Vec<HealthCheck> {
        vec![
            HealthCheck {
                name: "Splunk healthcheck".to_string(),
                severity: 1,
                business_impact:
                    "Logs are not reaching Splunk therefore monitoring may be affected".to_string(),
                technical_summary:
                    "Latest request to Splunk HEC has returned an error - check the service logs"
                        .to_string(),
                panic_guide: panic_guide.to_string(),
                checker: splunk,
            },
            HealthCheck {
                name: "S3 healthcheck".to_string(),
                severity: 1,
                business_impact:
                    "Logs can not be read from S3 and will probably be indexed with delay"
                        .to_string(),
                technical_summary:
                    "Latest request to S3 has returned an error - check the service logs"
                        .to_string(),
                panic_guide: panic_guide.to_string(),
                checker: cache,
            },
        ]
    }

    #[must_use]
    pub fn checks(&self) -> &[HealthCheck] {
        &self.checks
    }

    #[must_use]
    pub fn check_all(&self) -> Vec<CheckResult> {
        self.checks
            .iter()
            .map(|check| {
                let result = check.checker.health();
                CheckResult {
                    name: check.name.clone(),
                    ok: result.is_ok(),
                    output: output(&check.name, result),
                }
            })
            .collect()
    }

    /// Fails on the first unhealthy check.
    #[must_use]
    pub fn good_to_go(&self) -> GoodToGo {
        for check in &self.checks {
            if let Err(e) = check.checker.health() {
                return GoodToGo {
                    good_to_go: false,
                    message: e.to_string(),
                };
            }
        }
        GoodToGo {
            good_to_go: true,
            message: String::new(),
        }
    }
}

fn output(name: &str, result: Result<(), Unhealthy>) -> String {
    let component = name.trim_end_matches(" healthcheck");
    match result {
        Ok(()) => format!("{component} is healthy"),
        Err(e) => format!("{component} is not healthy: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Toggle(Mutex<Option<Unhealthy>>);

    impl Healthy for Toggle {
        fn health(&self) -> Result<(), Unhealthy> {
            match self.0.lock().unwrap().as_ref() {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    fn service() -> (Arc<Toggle>, Arc<Toggle>, HealthService) {
        let splunk = Arc::new(Toggle::default());
        let cache = Arc::new(Toggle::default());
        let checks = HealthService::forwarder_checks(
            Arc::clone(&splunk) as Arc<dyn Healthy>,
            Arc::clone(&cache) as Arc<dyn Healthy>,
            "https://runbooks.example.com/resilient-splunk-forwarder",
        );
        let service = HealthService::new(
            "resilient-splunk-forwarder".to_string(),
            "Resilient Splunk Forwarder".to_string(),
            checks,
        );
        (splunk, cache, service)
    }

    #[test]
    fn test_all_healthy() {
        let (_, _, service) = service();
        let results = service.check_all();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.ok));
        assert_eq!(results[0].output, "Splunk is healthy");
        assert_eq!(results[1].output, "S3 is healthy");
        assert!(service.good_to_go().good_to_go);
    }

    #[test]
    fn test_unhealthy_cache_fails_good_to_go() {
        let (_, cache, service) = service();
        *cache.0.lock().unwrap() = Some(Unhealthy::new("AccessDenied"));

        let results = service.check_all();
        assert!(results[0].ok);
        assert!(!results[1].ok);
        assert_eq!(results[1].output, "S3 is not healthy: AccessDenied");

        let gtg = service.good_to_go();
        assert!(!gtg.good_to_go);
        assert_eq!(gtg.message, "AccessDenied");
    }

    #[test]
    fn test_good_to_go_reports_first_failure() {
        let (splunk, cache, service) = service();
        *splunk.0.lock().unwrap() = Some(Unhealthy::new("503 Service Unavailable"));
        *cache.0.lock().unwrap() = Some(Unhealthy::new("AccessDenied"));

        assert_eq!(service.good_to_go().message, "503 Service Unavailable");
    }
}
