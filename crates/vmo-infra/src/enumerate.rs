//! Paginated server listing.
//!
//! A full page means there may be more: the next page is fetched on its own
//! task while the current one is decoded, and joined before the current
//! call returns. By the time [`InstanceEnumerator::enumerate`] resolves,
//! every page has been walked and results are in page order.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::debug;

use crate::observe::{ServerPage, ServerRecord};
use crate::plane::{Command, CommandBody, ControlPlane, PageRequest, ResourceRef};
use crate::types::{InstanceId, InstanceObservation};
use crate::{Error, Result};

pub const PAGE_SIZE: usize = 250;

/// Filters applied by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerQuery {
    pub location: Option<String>,
    pub id: Option<InstanceId>,
    /// Newest first, restricted to pending, normal and changing servers.
    pub newest_first: bool,
}

impl ServerQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: &InstanceId) -> Self {
        Self {
            id: Some(id.clone()),
            ..Self::default()
        }
    }

    pub fn newest_first() -> Self {
        Self {
            newest_first: true,
            ..Self::default()
        }
    }

    fn page(&self, page_number: usize) -> CommandBody {
        CommandBody::Page(PageRequest {
            page_size: PAGE_SIZE,
            page_number,
            location: self.location.clone(),
            id: self.id.clone(),
            newest_first: self.newest_first,
        })
    }
}

/// One-shot sequence of observations from a completed enumeration.
///
/// Not restartable; issue a fresh enumeration to re-scan.
#[derive(Debug)]
pub struct Observations {
    inner: std::vec::IntoIter<InstanceObservation>,
}

impl Iterator for Observations {
    type Item = InstanceObservation;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Observations {}

#[derive(Clone)]
pub struct InstanceEnumerator {
    plane: Arc<dyn ControlPlane>,
}

impl InstanceEnumerator {
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self { plane }
    }

    pub async fn enumerate(&self, query: ServerQuery) -> Result<Observations> {
        let all = fetch_from(self.plane.clone(), Arc::new(query), 1).await?;
        debug!(count = all.len(), "enumerated servers");
        Ok(Observations {
            inner: all.into_iter(),
        })
    }

    /// Current observation of one server, `None` if it no longer exists.
    pub async fn find(&self, id: &InstanceId) -> Result<Option<InstanceObservation>> {
        Ok(self
            .enumerate(ServerQuery::by_id(id))
            .await?
            .find(|obs| &obs.id == id))
    }

    /// Newest server with this name on this VLAN.
    ///
    /// Deploy does not return an id, so this is how a fresh deployment is
    /// located.
    pub async fn find_by_name_and_vlan(
        &self,
        name: &str,
        vlan_id: &str,
    ) -> Result<Option<InstanceObservation>> {
        Ok(self
            .enumerate(ServerQuery::newest_first())
            .await?
            .find(|obs| obs.name == name && obs.vlan_id.as_deref() == Some(vlan_id)))
    }
}

fn fetch_from(
    plane: Arc<dyn ControlPlane>,
    query: Arc<ServerQuery>,
    page_number: usize,
) -> BoxFuture<'static, Result<Vec<InstanceObservation>>> {
    async move {
        let resource = ResourceRef::Servers;
        let body = query.page(page_number);
        let outcome = plane
            .invoke(Command::ListWithState, &resource, Some(&body))
            .await?
            .into_result(Command::ListWithState, &resource)?;
        let page = ServerPage::from_payload(outcome.payload)?;

        let next = (page.page_count >= PAGE_SIZE).then(|| {
            debug!(page_number, "full page, fetching the next one");
            tokio::spawn(fetch_from(plane.clone(), query.clone(), page_number + 1))
        });

        let mut observations: Vec<InstanceObservation> = page
            .servers
            .into_iter()
            .map(ServerRecord::into_observation)
            .collect();

        if let Some(handle) = next {
            match handle.await {
                Ok(rest) => observations.extend(rest?),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => return Err(Error::Cancelled),
            }
        }
        Ok(observations)
    }
    .boxed()
}
