//! sled-backed row store
//!
//! Every row is a CBOR record under a `tenant/...` key. Writes that race with
//! other writers go through `compare_and_swap` against the exact bytes that were
//! read, which is the only synchronisation the workflow relies on.
use crate::approval::{ApprovalAction, ApprovalFlow, ApprovalRequest};
use crate::error::Result;
use crate::order::Order;
use crate::utils::tenant_key;
use crate::workflow::TransitionIntent;
use sled::{IVec, Tree};
use std::sync::Arc;

/// A decoded row together with the bytes it was decoded from.
/// The bytes are the compare-and-swap witness for a later write.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub raw: IVec,
    pub value: T,
}

#[derive(Clone)]
pub struct Store {
    instance: Arc<sled::Db>,
    orders: Tree,
    requests: Tree,
    actions: Tree,
    flows: Tree,
    open_approvals: Tree,
    intents: Tree,
}

fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    Ok(minicbor::to_vec(value)?)
}

fn get<T>(tree: &Tree, key: &[u8]) -> Result<Option<Versioned<T>>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key)? {
        Some(raw) => {
            let value = decode(&raw)?;
            Ok(Some(Versioned { raw, value }))
        }
        None => Ok(None),
    }
}

// insert only when the key is vacant
fn insert_new<T: minicbor::Encode<()>>(tree: &Tree, key: &[u8], value: &T) -> Result<bool> {
    let cbor = encode(value)?;
    Ok(tree
        .compare_and_swap(key, None as Option<&[u8]>, Some(cbor))?
        .is_ok())
}

// replace only when the stored bytes are still the ones we read
fn swap<T: minicbor::Encode<()>>(tree: &Tree, key: &[u8], old: &IVec, new: &T) -> Result<bool> {
    let cbor = encode(new)?;
    Ok(tree.compare_and_swap(key, Some(old), Some(cbor))?.is_ok())
}

fn scan<T>(tree: &Tree, prefix: &[u8]) -> Result<Vec<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    tree.scan_prefix(prefix)
        .values()
        .map(|row| decode(&row?))
        .collect()
}

fn scan_all<T>(tree: &Tree) -> Result<Vec<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    tree.iter().values().map(|row| decode(&row?)).collect()
}

fn entity_key(tenant_id: &str, entity_type: &str, entity_id: &str) -> Vec<u8> {
    format!("{tenant_id}/{entity_type}/{entity_id}").into_bytes()
}

impl Store {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self> {
        Ok(Self {
            orders: instance.open_tree("orders")?,
            requests: instance.open_tree("approval_requests")?,
            actions: instance.open_tree("approval_actions")?,
            flows: instance.open_tree("approval_flows")?,
            open_approvals: instance.open_tree("open_approvals")?,
            intents: instance.open_tree("transition_intents")?,
            instance,
        })
    }

    /// Open (or create) a database at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(Arc::new(sled::open(path)?))
    }

    pub fn flush(&self) -> Result<usize> {
        Ok(self.instance.flush()?)
    }

    // orders

    pub fn load_order(&self, tenant_id: &str, order_id: &str) -> Result<Option<Versioned<Order>>> {
        get(&self.orders, &tenant_key(tenant_id, order_id))
    }

    pub fn insert_order(&self, order: &Order) -> Result<bool> {
        insert_new(&self.orders, &tenant_key(&order.tenant_id, &order.id), order)
    }

    pub fn swap_order(&self, old: &IVec, new: &Order) -> Result<bool> {
        swap(&self.orders, &tenant_key(&new.tenant_id, &new.id), old, new)
    }

    pub fn all_orders(&self) -> Result<Vec<Order>> {
        scan_all(&self.orders)
    }

    // approval requests

    pub fn load_request(
        &self,
        tenant_id: &str,
        request_id: &str,
    ) -> Result<Option<Versioned<ApprovalRequest>>> {
        get(&self.requests, &tenant_key(tenant_id, request_id))
    }

    pub fn insert_request(&self, request: &ApprovalRequest) -> Result<bool> {
        insert_new(
            &self.requests,
            &tenant_key(&request.tenant_id, &request.id),
            request,
        )
    }

    pub fn swap_request(&self, old: &IVec, new: &ApprovalRequest) -> Result<bool> {
        swap(&self.requests, &tenant_key(&new.tenant_id, &new.id), old, new)
    }

    /// Drops a request row that never got hold of its entity.
    pub fn remove_request(&self, tenant_id: &str, request_id: &str) -> Result<()> {
        self.requests.remove(tenant_key(tenant_id, request_id))?;
        Ok(())
    }

    pub fn all_requests(&self) -> Result<Vec<ApprovalRequest>> {
        scan_all(&self.requests)
    }

    // decision log, content addressed under its request

    pub fn append_action(&self, tenant_id: &str, action: &ApprovalAction) -> Result<String> {
        let (hash, cbor) = action.build()?;
        let key = format!("{tenant_id}/{}/{hash}", action.request_id);
        self.actions.insert(key.as_bytes(), cbor)?;
        Ok(hash)
    }

    pub fn actions(&self, tenant_id: &str, request_id: &str) -> Result<Vec<ApprovalAction>> {
        let prefix = format!("{tenant_id}/{request_id}/");
        let mut actions: Vec<ApprovalAction> = scan(&self.actions, prefix.as_bytes())?;
        actions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.step_order.cmp(&b.step_order))
        });
        Ok(actions)
    }

    // flows

    pub fn save_flow(&self, flow: &ApprovalFlow) -> Result<()> {
        self.flows
            .insert(tenant_key(&flow.tenant_id, &flow.id), encode(flow)?)?;
        Ok(())
    }

    pub fn get_flow(&self, tenant_id: &str, flow_id: &str) -> Result<Option<ApprovalFlow>> {
        Ok(get(&self.flows, &tenant_key(tenant_id, flow_id))?.map(|v| v.value))
    }

    // one open request per entity

    /// Claims `entity` for `request_id`. Returns the current holder when taken.
    ///
    /// A holder whose request row is missing or no longer pending is left over
    /// from an interrupted creation or resolution and gets replaced.
    pub fn claim_entity(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
        request_id: &str,
    ) -> Result<std::result::Result<(), String>> {
        let key = entity_key(tenant_id, entity_type, entity_id);
        let mut expected: Option<IVec> = None;

        loop {
            let swapped = self.open_approvals.compare_and_swap(
                &key,
                expected.as_ref(),
                Some(request_id.as_bytes()),
            )?;
            let current = match swapped {
                Ok(()) => return Ok(Ok(())),
                Err(e) => e.current,
            };

            // released in the meantime, try again for a vacant slot
            let Some(current) = current else {
                expected = None;
                continue;
            };

            let holder = String::from_utf8_lossy(&current).into_owned();
            let live = self
                .load_request(tenant_id, &holder)?
                .is_some_and(|r| r.value.is_pending());
            if live {
                return Ok(Err(holder));
            }

            tracing::warn!(
                tenant_id,
                entity_type,
                entity_id,
                stale_holder = %holder,
                request_id,
                "replacing stale approval claim"
            );
            expected = Some(current);
        }
    }

    /// Releases the claim, but only if `request_id` still holds it.
    pub fn release_entity(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
        request_id: &str,
    ) -> Result<()> {
        let key = entity_key(tenant_id, entity_type, entity_id);
        // losing here means someone else already released or re-claimed it
        let _ = self.open_approvals.compare_and_swap(
            &key,
            Some(request_id.as_bytes()),
            None as Option<&[u8]>,
        )?;
        Ok(())
    }

    pub fn entity_holder(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .open_approvals
            .get(entity_key(tenant_id, entity_type, entity_id))?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    // pending order transitions awaiting an approval outcome

    pub fn save_intent(&self, intent: &TransitionIntent) -> Result<()> {
        self.intents.insert(
            tenant_key(&intent.tenant_id, &intent.request_id),
            encode(intent)?,
        )?;
        Ok(())
    }

    pub fn load_intent(&self, tenant_id: &str, request_id: &str) -> Result<Option<TransitionIntent>> {
        Ok(get(&self.intents, &tenant_key(tenant_id, request_id))?.map(|v| v.value))
    }

    pub fn all_intents(&self) -> Result<Vec<TransitionIntent>> {
        scan_all(&self.intents)
    }

    pub fn remove_intent(&self, tenant_id: &str, request_id: &str) -> Result<()> {
        self.intents.remove(tenant_key(tenant_id, request_id))?;
        Ok(())
    }
}
