use super::payload::{render_value, Payload, Target, TargetError};
use crate::tfstate::diff::{DiffStatus, OutputDiff, ResourceDiff, StateDiff};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;

/// Changed attributes listed per resource before the rest are summarized.
pub const MAX_ATTRIBUTES_SHOWN: usize = 5;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts a Block Kit message to a Slack incoming webhook. Failures are not
/// retried.
pub struct SlackTarget {
    client: Client,
    webhook_url: String,
    channel: Option<String>,
    username: Option<String>,
    icon_emoji: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SlackMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_emoji: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Block>,
}

#[derive(Debug, Serialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub block_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextObject>,
}

#[derive(Debug, Serialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub text_type: &'static str,
    pub text: String,
}

impl Block {
    fn header(text: &str) -> Self {
        Self {
            block_type: "header",
            text: Some(TextObject {
                text_type: "plain_text",
                text: text.to_string(),
            }),
        }
    }

    fn section(text: String) -> Self {
        Self {
            block_type: "section",
            text: Some(TextObject {
                text_type: "mrkdwn",
                text,
            }),
        }
    }

    fn divider() -> Self {
        Self {
            block_type: "divider",
            text: None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

impl SlackTarget {
    pub fn new(
        webhook_url: &str,
        channel: Option<&str>,
        username: Option<&str>,
        icon_emoji: Option<&str>,
    ) -> Result<Self, TargetError> {
        if webhook_url.is_empty() {
            return Err(TargetError::InvalidConfig(
                "slack webhook URL is required".to_string(),
            ));
        }

        Ok(Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            webhook_url: webhook_url.to_string(),
            channel: non_empty(channel),
            username: non_empty(username),
            icon_emoji: non_empty(icon_emoji),
        })
    }

    pub fn build_message(&self, payload: &Payload) -> SlackMessage {
        let mut blocks = vec![Block::header("Terraform State Changes")];

        let mut context = format!(
            "*Time:* {}\n*Source:* `{}`",
            payload.formatted_time(),
            payload.source
        );
        if let Some(git) = &payload.git {
            context.push_str("\n\n*Git Context*\n");
            if !git.committer.is_empty() {
                let _ = writeln!(context, "👤 *Committer:* {}", git.committer);
            }
            if !git.branch.is_empty() {
                let _ = writeln!(context, "🌿 *Branch:* `{}`", git.branch);
            }
            if !git.commit_sha.is_empty() {
                let _ = writeln!(context, "📝 *Commit:* `{}`", git.short_sha());
            }
            if !git.repo_url.is_empty() {
                let _ = writeln!(context, "🔗 *Repository:* {}", git.repo_url);
            }
        }
        blocks.push(Block::section(context));
        blocks.push(Block::divider());

        if !payload.diffs.resource_diffs.is_empty() {
            blocks.push(Block::section(format_resource_changes(
                &payload.diffs.resource_diffs,
            )));
        }
        if !payload.diffs.output_diffs.is_empty() {
            blocks.push(Block::section(format_output_changes(
                &payload.diffs.output_diffs,
            )));
        }

        SlackMessage {
            channel: self.channel.clone(),
            username: self.username.clone(),
            icon_emoji: self.icon_emoji.clone(),
            text: fallback_text(&payload.diffs),
            blocks,
        }
    }
}

#[async_trait]
impl Target for SlackTarget {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn write(&self, payload: &Payload) -> Result<(), TargetError> {
        let message = self.build_message(payload);

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TargetError::Status {
                target: "slack",
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

pub fn status_emoji(status: DiffStatus) -> &'static str {
    match status {
        DiffStatus::Added => ":large_green_circle:",
        DiffStatus::Removed => ":red_circle:",
        DiffStatus::Changed => ":large_yellow_circle:",
    }
}

fn qualified_name(diff: &ResourceDiff) -> String {
    match &diff.module {
        Some(module) => format!("{}.{}.{}", module, diff.resource_type, diff.resource_name),
        None => format!("{}.{}", diff.resource_type, diff.resource_name),
    }
}

pub fn format_resource_changes(diffs: &[ResourceDiff]) -> String {
    let mut text = String::from("*Resource Changes*\n\n");

    for diff in diffs {
        let _ = writeln!(
            text,
            "{} `{}` - {}",
            status_emoji(diff.status),
            qualified_name(diff),
            diff.status
        );

        for (attr, change) in diff.attribute_diffs.iter().take(MAX_ATTRIBUTES_SHOWN) {
            let _ = writeln!(
                text,
                "    • `{}`: `{}` → `{}`",
                attr,
                render_value(change.before.as_ref()),
                render_value(change.after.as_ref())
            );
        }
        if diff.attribute_diffs.len() > MAX_ATTRIBUTES_SHOWN {
            let _ = writeln!(
                text,
                "    • _...and {} more attributes_",
                diff.attribute_diffs.len() - MAX_ATTRIBUTES_SHOWN
            );
        }
    }

    text
}

pub fn format_output_changes(diffs: &[OutputDiff]) -> String {
    let mut text = String::from("*Output Changes*\n\n");

    for diff in diffs {
        let _ = writeln!(
            text,
            "{} `{}` - {}",
            status_emoji(diff.status),
            diff.output_name,
            diff.status
        );
        if diff.status == DiffStatus::Changed {
            let _ = writeln!(
                text,
                "    • `{}` → `{}`",
                render_value(diff.value_diff.before.as_ref()),
                render_value(diff.value_diff.after.as_ref())
            );
        }
    }

    text
}

pub fn fallback_text(diffs: &StateDiff) -> String {
    let mut parts = Vec::new();
    if !diffs.resource_diffs.is_empty() {
        parts.push(format!("{} resource(s)", diffs.resource_diffs.len()));
    }
    if !diffs.output_diffs.is_empty() {
        parts.push(format!("{} output(s)", diffs.output_diffs.len()));
    }
    format!(
        "Terraform state changes detected: {} changed",
        parts.join(", ")
    )
}
