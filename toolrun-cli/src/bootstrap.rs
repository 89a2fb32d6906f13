//! Demonstration tools registered by the CLI

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde_json::{Value, json};
use std::time::Duration;
use toolrun_core::prelude::*;

/// Register the built-in tools, in order: `echo`, `date_add`, `word_count`
pub fn register_builtin_tools(executor: &ToolExecutor) {
    executor.register(echo_tool().into_plugin());
    executor.register(date_add_tool().into_plugin());
    executor.register(word_count_tool().into_plugin());
    tracing::debug!(tools = executor.registry().len(), "Built-in tools registered");
}

fn echo_tool() -> FnTool {
    FnTool::new(
        ToolMetadata::new("echo", "Returns its params unchanged").with_tag("debug"),
        ToolSchema::any_object(),
        |params, _ctx| async move { Ok(ToolResult::success(params)) },
    )
}

fn date_add_tool() -> FnTool {
    FnTool::new(
        ToolMetadata::new("date_add", "Adds a number of days to a date (default: today, UTC)")
            .with_tag("time"),
        ToolSchema::new(json!({
            "type": "object",
            "properties": {
                "date": { "type": "string", "description": "ISO date, YYYY-MM-DD" },
                "days": { "type": "integer" }
            },
            "required": ["days"]
        })),
        |params, _ctx| async move { Ok(date_add(&params)) },
    )
    .with_rate_limit(
        RateLimitConfig::new()
            .with_max_concurrent(8)
            .with_timeout(Duration::from_secs(2)),
    )
}

fn date_add(params: &Value) -> ToolResult {
    let Some(days) = params.get("days").and_then(Value::as_i64) else {
        return ToolResult::failure("'days' must be an integer").with_status_code(400);
    };

    let start = match params.get("date").and_then(Value::as_str) {
        Some(text) => match NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            Ok(date) => date,
            Err(e) => {
                return ToolResult::failure(format!("Invalid date '{}': {}", text, e))
                    .with_status_code(400);
            }
        },
        None => Utc::now().date_naive(),
    };

    match ChronoDuration::try_days(days).and_then(|delta| start.checked_add_signed(delta)) {
        Some(result) => ToolResult::success(json!({
            "date": start.to_string(),
            "days": days,
            "result": result.to_string(),
            "weekday": result.format("%A").to_string(),
        })),
        None => ToolResult::failure(format!("{} days from {} is out of range", days, start))
            .with_status_code(400),
    }
}

fn word_count_tool() -> FnTool {
    FnTool::new(
        ToolMetadata::new("word_count", "Counts words, characters, and lines").with_tag("text"),
        ToolSchema::new(json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })),
        |params, _ctx| async move {
            let text = params.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(ToolResult::success(json!({
                "words": text.split_whitespace().count(),
                "characters": text.chars().count(),
                "lines": text.lines().count(),
            })))
        },
    )
    .with_cache(CacheConfig::new(Duration::from_secs(300)))
}
