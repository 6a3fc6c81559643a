//! Data probe: seed a known key before backup, read it back after restore.

use tracing::info;

use crate::error::{Error, Result};

use super::lifecycle::MemberEndpoint;
use super::Context;

pub const PROBE_KEY: &str = "foo";
pub const PROBE_VALUE: &str = "bar";

pub async fn seed(ctx: &Context, endpoint: &MemberEndpoint) -> Result<()> {
    ctx.transport
        .put(&endpoint.url, PROBE_KEY, PROBE_VALUE)
        .await
        .map_err(|e| Error::ProbeWrite {
            endpoint: endpoint.url.clone(),
            reason: e.to_string(),
        })?;
    info!(member = %endpoint.name, key = PROBE_KEY, "seeded probe data");
    Ok(())
}

pub async fn verify(ctx: &Context, endpoint: &MemberEndpoint) -> Result<()> {
    let observed = ctx
        .transport
        .get(&endpoint.url, PROBE_KEY)
        .await
        .map_err(|e| Error::ProbeRead {
            endpoint: endpoint.url.clone(),
            reason: e.to_string(),
        })?;
    if observed.as_deref() != Some(PROBE_VALUE) {
        return Err(Error::DataMismatch {
            endpoint: endpoint.url.clone(),
            key: PROBE_KEY.into(),
            expected: PROBE_VALUE.into(),
            observed,
        });
    }
    info!(member = %endpoint.name, key = PROBE_KEY, "probe data verified");
    Ok(())
}
