//! Runtime configuration commands.

use anyhow::Result;
use std::collections::BTreeMap;

use super::print_json;
use crate::context::Context;

pub async fn get(ctx: &Context, key: Option<&str>) -> Result<()> {
    let queue = ctx.queue();
    match key {
        Some(key) => {
            let value = queue.config_get(key).await?;
            let mut out = BTreeMap::new();
            out.insert(key.to_string(), value);
            print_json(&out)
        }
        None => print_json(&queue.config_all().await?),
    }
}

pub async fn set(ctx: &Context, key: &str, value: &str) -> Result<()> {
    ctx.queue().config_set(key, value).await?;
    eprintln!("Config set {}={}", key, value);
    Ok(())
}
