use std::{collections::HashMap, time::Duration};

use {
    chrono::{DateTime, Utc},
    medlink_protocol::{HospitalProfile, Request, RequestId, RequestState},
};

use crate::error::HubError;

/// Outcome of accepting a request that exists in the ledger.
#[derive(Debug)]
pub enum Acceptance<'a> {
    /// `Pending -> Accepted` happened now.
    Accepted(&'a Request),
    /// Someone got there first; nothing changed.
    AlreadyAccepted(&'a Request),
}

/// Active cross-hospital requests keyed by request id.
#[derive(Default)]
pub struct RequestLedger {
    requests: HashMap<RequestId, Request>,
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request, replacing any request with the same id.
    pub fn insert(&mut self, request: Request) -> Option<Request> {
        self.requests.insert(request.id.clone(), request)
    }

    pub fn get(&self, id: &RequestId) -> Option<&Request> {
        self.requests.get(id)
    }

    pub fn accept(
        &mut self,
        id: &RequestId,
        by: HospitalProfile,
        at: DateTime<Utc>,
    ) -> Result<Acceptance<'_>, HubError> {
        let request = self
            .requests
            .get_mut(id)
            .ok_or_else(|| HubError::UnknownRequest(id.clone()))?;
        if let RequestState::Accepted { .. } = request.state {
            return Ok(Acceptance::AlreadyAccepted(request));
        }
        request.state = RequestState::Accepted {
            accepted_by: by,
            accepted_at: at,
        };
        Ok(Acceptance::Accepted(request))
    }

    /// All active requests, oldest first.
    pub fn snapshot(&self) -> Vec<Request> {
        let mut list: Vec<_> = self.requests.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// Delete every request created more than `retention` before `now`,
    /// regardless of status. Returns the removed ids.
    pub fn sweep(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<RequestId> {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return Vec::new();
        };
        let expired: Vec<RequestId> = self
            .requests
            .values()
            .filter(|r| r.created_at < cutoff)
            .map(|r| r.id.clone())
            .collect();
        for id in &expired {
            self.requests.remove(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
