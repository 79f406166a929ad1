//! Provisioning requests and their validation.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::gateway::Tag;
use crate::poller::{MAX_JOB_TIMEOUT, PollingPolicy};

/// Token replaced with the assigned machine identifier in boot payloads of
/// resource-based requests.
pub const INSTANCE_ID_PLACEHOLDER: &str = "<INSTANCE_ID>";

/// How a job obtains the identity of the machine it provisions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MachineSelector {
    /// Allocate one specific machine.
    ById {
        /// Remote identifier of the machine.
        system_id: String,
    },
    /// Allocate any machine with at least these resources.
    ByResources {
        /// Minimum number of CPU cores.
        cpu_count: u32,
        /// Minimum memory in megabytes.
        memory_mb: u64,
    },
}

impl fmt::Display for MachineSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ById { system_id } => write!(f, "machine {system_id}"),
            Self::ByResources {
                cpu_count,
                memory_mb,
            } => write!(f, "machine with {cpu_count} CPUs and {memory_mb} MB"),
        }
    }
}

/// Errors raised while building a [`ProvisioningRequest`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// Raised when a field is missing, empty or zero.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when the per-job timeout exceeds [`MAX_JOB_TIMEOUT`].
    #[error(
        "job timeout of {}s exceeds the {}s limit",
        requested.as_secs(),
        MAX_JOB_TIMEOUT.as_secs()
    )]
    TimeoutTooLong {
        /// Timeout carried by the request.
        requested: Duration,
    },
}

/// Immutable description of one provisioning job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningRequest {
    /// Identity strategy for the machine.
    pub selector: MachineSelector,
    /// Opaque boot payload handed to the deploy step.
    pub payload: Option<String>,
    /// Tags attached before deployment, in order, unique by name.
    pub tags: Vec<Tag>,
    /// Per-job polling override; the orchestrator default applies otherwise.
    pub policy: Option<PollingPolicy>,
}

impl ProvisioningRequest {
    /// Starts a builder targeting a specific machine.
    #[must_use]
    pub fn by_id(system_id: impl Into<String>) -> ProvisioningRequestBuilder {
        ProvisioningRequestBuilder::new(MachineSelector::ById {
            system_id: system_id.into(),
        })
    }

    /// Starts a builder targeting any machine with enough resources.
    #[must_use]
    pub fn by_resources(cpu_count: u32, memory_mb: u64) -> ProvisioningRequestBuilder {
        ProvisioningRequestBuilder::new(MachineSelector::ByResources {
            cpu_count,
            memory_mb,
        })
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Validation`] naming the first offending field
    /// and [`RequestError::TimeoutTooLong`] for an oversized deadline.
    pub fn validate(&self) -> Result<(), RequestError> {
        match &self.selector {
            MachineSelector::ById { system_id } if system_id.is_empty() => {
                return Err(RequestError::Validation("system_id".to_owned()));
            }
            MachineSelector::ByResources { cpu_count: 0, .. } => {
                return Err(RequestError::Validation("cpu_count".to_owned()));
            }
            MachineSelector::ByResources { memory_mb: 0, .. } => {
                return Err(RequestError::Validation("memory_mb".to_owned()));
            }
            MachineSelector::ById { .. } | MachineSelector::ByResources { .. } => {}
        }
        if self.payload.as_deref().is_some_and(str::is_empty) {
            return Err(RequestError::Validation("payload".to_owned()));
        }
        if self.tags.iter().any(|tag| tag.name.is_empty()) {
            return Err(RequestError::Validation("tag name".to_owned()));
        }
        if let Some(requested) = self
            .policy
            .map(|policy| policy.timeout)
            .filter(|timeout| *timeout > MAX_JOB_TIMEOUT)
        {
            return Err(RequestError::TimeoutTooLong { requested });
        }
        Ok(())
    }

    /// Returns the payload handed to the deploy step for `system_id`.
    ///
    /// Resource-based requests learn their machine identity only after
    /// allocation, so their payload may reference it through
    /// [`INSTANCE_ID_PLACEHOLDER`]. Requests by identifier pass the payload
    /// through untouched.
    #[must_use]
    pub fn payload_for(&self, system_id: &str) -> Option<String> {
        let payload = self.payload.as_deref()?;
        match self.selector {
            MachineSelector::ByResources { .. } => {
                Some(payload.replace(INSTANCE_ID_PLACEHOLDER, system_id))
            }
            MachineSelector::ById { .. } => Some(payload.to_owned()),
        }
    }
}

/// Builder for [`ProvisioningRequest`] that trims inputs and validates on
/// construction.
#[derive(Clone, Debug)]
pub struct ProvisioningRequestBuilder {
    selector: MachineSelector,
    payload: Option<String>,
    tags: Vec<Tag>,
    policy: Option<PollingPolicy>,
}

impl ProvisioningRequestBuilder {
    /// Creates a builder for the given selector.
    #[must_use]
    pub const fn new(selector: MachineSelector) -> Self {
        Self {
            selector,
            payload: None,
            tags: Vec::new(),
            policy: None,
        }
    }

    /// Sets the boot payload.
    #[must_use]
    pub fn payload(mut self, value: Option<String>) -> Self {
        self.payload = value;
        self
    }

    /// Appends a tag.
    #[must_use]
    pub fn tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Appends several tags.
    #[must_use]
    pub fn tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Overrides the polling policy for this job.
    #[must_use]
    pub const fn policy(mut self, policy: PollingPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Builds and validates the request.
    ///
    /// Duplicate tag names collapse to their first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Validation`] when a field is empty or zero
    /// and [`RequestError::TimeoutTooLong`] for an oversized deadline.
    pub fn build(self) -> Result<ProvisioningRequest, RequestError> {
        let selector = match self.selector {
            MachineSelector::ById { system_id } => MachineSelector::ById {
                system_id: system_id.trim().to_owned(),
            },
            resources @ MachineSelector::ByResources { .. } => resources,
        };

        let mut seen = HashSet::new();
        let tags = self
            .tags
            .into_iter()
            .map(|tag| Tag::new(tag.name.trim(), tag.description.trim()))
            .filter(|tag| seen.insert(tag.name.clone()))
            .collect();

        let request = ProvisioningRequest {
            selector,
            payload: self
                .payload
                .map(|value| if value.trim().is_empty() { String::new() } else { value }),
            tags,
            policy: self.policy,
        };
        request.validate()?;
        Ok(request)
    }
}
