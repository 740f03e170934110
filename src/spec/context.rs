//! Cloud context: the account and region a declaration is built for.
//!
//! Both values arrive as explicit parameters. Nothing below the CLI reads them
//! from the process environment.

use crate::error::ConfigurationError;
use regex::Regex;
use serde::Serialize;
use std::fmt;

const ACCOUNT_RE: &str = r"^\d{12}$";
/// Commercial, China and GovCloud regions. ISO partitions are not supported.
const REGION_RE: &str = r"^[a-z]{2}(-gov)?-[a-z]+-\d{1,2}$";

/// AWS partition, derived from the region name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Partition {
    Aws,
    AwsCn,
    AwsUsGov,
}

impl Partition {
    pub fn for_region(region: &str) -> Self {
        if region.starts_with("cn-") {
            Partition::AwsCn
        } else if region.starts_with("us-gov-") {
            Partition::AwsUsGov
        } else {
            Partition::Aws
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Aws => "aws",
            Partition::AwsCn => "aws-cn",
            Partition::AwsUsGov => "aws-us-gov",
        }
    }

    pub fn url_suffix(self) -> &'static str {
        match self {
            Partition::AwsCn => "amazonaws.com.cn",
            Partition::Aws | Partition::AwsUsGov => "amazonaws.com",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloudContext {
    pub account: String,
    pub region: String,
    pub partition: Partition,
}

impl CloudContext {
    /// Validate account/region and derive the partition.
    pub fn new(
        account: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let account = account.into();
        let region = region.into();

        let account_re = Regex::new(ACCOUNT_RE).map_err(|e| ConfigurationError::InvalidValue {
            field: "account",
            reason: e.to_string(),
        })?;
        if !account_re.is_match(&account) {
            return Err(ConfigurationError::InvalidAccount(account));
        }
        let region = validate_region(region)?;

        let partition = Partition::for_region(&region);
        Ok(Self {
            account,
            region,
            partition,
        })
    }
}

/// Check a region name on its own, for operations that need no account.
pub fn validate_region(region: impl Into<String>) -> Result<String, ConfigurationError> {
    let region = region.into();
    let region_re = Regex::new(REGION_RE).map_err(|e| ConfigurationError::InvalidValue {
        field: "region",
        reason: e.to_string(),
    })?;
    if !region_re.is_match(&region) {
        return Err(ConfigurationError::InvalidRegion(region));
    }
    Ok(region)
}
