//! ARN-style resource identifiers.
//!
//! Example: arn:aws:ssm:us-east-1:123456789012:parameter/openai-discord-bot/discord-token
//!
//! Stored as its parts and rendered with `Display`. Ordering is derived so ARNs can
//! live in BTreeSet/Map and render in a stable order.

use crate::spec::CloudContext;
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource: String,
}

impl Arn {
    /// ARN of an SSM Parameter Store parameter, e.g. `/openai-discord-bot/discord-token`.
    pub fn ssm_parameter(ctx: &CloudContext, name: &str) -> Self {
        Self {
            partition: ctx.partition.as_str().to_string(),
            service: "ssm".to_string(),
            region: ctx.region.clone(),
            account: ctx.account.clone(),
            resource: format!("parameter/{}", name.trim_start_matches('/')),
        }
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account, self.resource
        )
    }
}

impl Serialize for Arn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_discord_token_parameter() {
        let ctx = CloudContext::new("123456789012", "us-east-1").unwrap();
        let arn = Arn::ssm_parameter(&ctx, "openai-discord-bot/discord-token");
        assert_eq!(
            arn.to_string(),
            "arn:aws:ssm:us-east-1:123456789012:parameter/openai-discord-bot/discord-token"
        );
    }

    #[test]
    fn leading_slash_is_not_doubled() {
        let ctx = CloudContext::new("123456789012", "cn-north-1").unwrap();
        let arn = Arn::ssm_parameter(&ctx, "/openai-discord-bot/openai-secret");
        assert_eq!(
            arn.to_string(),
            "arn:aws-cn:ssm:cn-north-1:123456789012:parameter/openai-discord-bot/openai-secret"
        );
    }
}
