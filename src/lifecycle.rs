use crate::errors::{Error, Result};
use crate::poll::{self, Budget};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use tokio::time::Duration;
use tracing::info;

pub const FIELD_MANAGER: &str = "workflow-operator";

/// Idempotent create-or-update-or-delete operations for managed resource
/// kinds. Existence is always re-queried, never assumed — other actors may
/// have created or removed resources out of band. Builders are responsible
/// for attaching the owner reference, so everything created here is adopted
/// unless the builder deliberately leaves it off.
pub async fn exists<K>(api: &Api<K>, name: &str) -> Result<bool>
where
    K: Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?.is_some())
}

/// Create if absent; no-op if present. Used for one-shot resources such as
/// services.
pub async fn ensure_created<K>(api: &Api<K>, name: &str, body: &K) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug + Serialize,
{
    if api.get_opt(name).await?.is_some() {
        info!("'{name}' already present, leaving as is");
        return Ok(());
    }
    api.create(&PostParams::default(), body).await?;
    Ok(())
}

/// Create if absent, else full replace. Replica and env drift must be
/// corrected wholesale, so this is a replace rather than a patch.
pub async fn ensure_replaced<K>(api: &Api<K>, name: &str, body: &K) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug + Serialize + Resource,
{
    match api.get_opt(name).await? {
        Some(existing) => {
            let mut desired = body.clone();
            desired.meta_mut().resource_version = existing.resource_version().into();
            api.replace(name, &PostParams::default(), &desired).await?;
        }
        None => {
            api.create(&PostParams::default(), body).await?;
        }
    }
    Ok(())
}

/// Partial merge patch if present, else create. Used where downtime must be
/// minimized (lite-topology deployment updates).
pub async fn ensure_patched<K>(api: &Api<K>, name: &str, body: &K) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug + Serialize,
{
    if api.get_opt(name).await?.is_some() {
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(body))
            .await?;
    } else {
        api.create(&PostParams::default(), body).await?;
    }
    Ok(())
}

/// Background-propagation delete; absence is a no-op, not an error.
pub async fn delete_if_present<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    let dp = DeleteParams::background().grace_period(0);
    match api.delete(name, &dp).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(Error::KubeError(e)),
    }
}

/// Delete with background propagation, then poll existence with no attempt
/// ceiling until the resource is observably gone. Used before recreating
/// jobs so a stale instance never coexists with a new one.
pub async fn delete_then_await_gone<K>(api: &Api<K>, name: &str, interval: Duration) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    if api.get_opt(name).await?.is_none() {
        return Ok(());
    }
    info!("deleting stale '{name}' and waiting until gone");
    delete_if_present(api, name).await?;
    poll::await_condition(interval, Budget::Unbounded, || async {
        Ok::<_, Error>(api.get_opt(name).await?.is_none())
    })
    .await?;
    Ok(())
}
