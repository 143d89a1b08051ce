//! etcd-backed key tree
//!
//! Implements [`KvStore`] on top of an already-connected
//! [`etcd_client::Client`]; connection bootstrap (endpoints, credentials)
//! belongs to the embedding process.

use async_trait::async_trait;
use bytes::Bytes;
use etcd_client::{
    Client, Compare, CompareOp, EventType, GetOptions, Txn, TxnOp, TxnOpResponse, WatchOptions,
};
use tracing::debug;

use omnio_core::{OmnioError, OmnioResult};

use crate::kv::{key_matches, KvBackend, KvEntry, KvEvent, KvEventKind, KvStore};

/// [`KvStore`] over an etcd cluster.
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Convenience constructor for the usual registration target.
    pub fn backend(client: Client) -> KvBackend<EtcdStore> {
        KvBackend::named("etcd", EtcdStore::new(client))
    }
}

fn transient(err: etcd_client::Error) -> OmnioError {
    OmnioError::Transient(err.to_string())
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get(&self, key: &str) -> OmnioResult<Option<KvEntry>> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await.map_err(transient)?;
        Ok(resp.kvs().first().map(|kv| KvEntry {
            value: Bytes::copy_from_slice(kv.value()),
            revision: kv.mod_revision() as u64,
        }))
    }

    async fn head_revision(&self) -> OmnioResult<u64> {
        let mut client = self.client.clone();
        // A keys-only point read is the cheapest way to learn the current
        // store revision.
        let resp = client
            .get("\0", Some(GetOptions::new().with_keys_only()))
            .await
            .map_err(transient)?;
        Ok(resp.header().map(|h| h.revision() as u64).unwrap_or(0))
    }

    async fn compare_and_put(&self, key: &str, expected: u64, value: Bytes) -> OmnioResult<u64> {
        let compare = if expected == 0 {
            // Key must not exist yet.
            Compare::create_revision(key, CompareOp::Equal, 0)
        } else {
            Compare::mod_revision(key, CompareOp::Equal, expected as i64)
        };
        let txn = Txn::new()
            .when([compare])
            .and_then([TxnOp::put(key, value.to_vec(), None)]);

        let mut client = self.client.clone();
        let resp = client.txn(txn).await.map_err(transient)?;
        if !resp.succeeded() {
            return Err(OmnioError::CommitConflict {
                path: key.to_string(),
                expected,
            });
        }

        let mut revision = 0;
        for op in resp.op_responses() {
            if let TxnOpResponse::Put(put) = op {
                if let Some(header) = put.header() {
                    revision = header.revision() as u64;
                }
            }
        }
        debug!(key, revision, "etcd commit applied");
        Ok(revision)
    }

    async fn list_prefix(&self, prefix: &str) -> OmnioResult<Vec<String>> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix().with_keys_only()))
            .await
            .map_err(transient)?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| String::from_utf8_lossy(kv.key()).into_owned())
            .collect())
    }

    async fn delete(&self, key: &str) -> OmnioResult<()> {
        let mut client = self.client.clone();
        client.delete(key, None).await.map_err(transient)?;
        Ok(())
    }

    async fn next_change(&self, key: &str, after: u64) -> OmnioResult<KvEvent> {
        let mut client = self.client.clone();
        // Watch the whole prefix and filter locally so subtree watches
        // behave exactly like the in-process store.
        let options = WatchOptions::new()
            .with_prefix()
            .with_start_revision((after + 1) as i64);
        let (mut subscription, mut stream) = client
            .watch(key, Some(options))
            .await
            .map_err(transient)?;

        while let Some(resp) = stream.message().await.map_err(transient)? {
            if resp.canceled() {
                return Err(OmnioError::FatalSubscription(format!(
                    "etcd watch on {key} canceled"
                )));
            }
            for event in resp.events() {
                let Some(kv) = event.kv() else { continue };
                let changed = String::from_utf8_lossy(kv.key()).into_owned();
                if !key_matches(key, &changed) {
                    continue;
                }

                let kind = match event.event_type() {
                    EventType::Put => KvEventKind::Set,
                    EventType::Delete => KvEventKind::Delete,
                };
                let _ = subscription.cancel().await;
                return Ok(KvEvent {
                    key: changed,
                    value: Bytes::copy_from_slice(kv.value()),
                    revision: kv.mod_revision() as u64,
                    kind,
                });
            }
        }

        Err(OmnioError::FatalSubscription(format!(
            "etcd watch stream on {key} closed"
        )))
    }
}
