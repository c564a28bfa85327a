//! Deduplicating writer: persists normalized tenders through a [`TenderStore`].

use tenderwatch_shared::{NormalizedTender, OrganisationKind};
use tenderwatch_storage::TenderStore;
use tracing::{debug, warn};

/// What happened to one tender handed to [`DedupWriter::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    /// Already stored under the same link or ocid.
    Duplicate,
    /// The store returned an error; the tender was not stored.
    Failed,
}

impl WriteOutcome {
    pub fn is_inserted(self) -> bool {
        self == WriteOutcome::Inserted
    }
}

/// Writes tenders idempotently and registers their organisations.
///
/// Store failures never escape: a failed insert is logged and reported as
/// [`WriteOutcome::Failed`], and organisation registration errors are logged
/// and ignored.
pub struct DedupWriter<'a> {
    store: &'a dyn TenderStore,
}

impl<'a> DedupWriter<'a> {
    pub fn new(store: &'a dyn TenderStore) -> Self {
        Self { store }
    }

    /// Persist `tender` unless an equivalent one is already stored.
    pub async fn write(&self, tender: &NormalizedTender) -> WriteOutcome {
        let inserted = match self.store.insert_if_absent(tender).await {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!(link = %tender.link, error = %e, "failed to store tender");
                return WriteOutcome::Failed;
            }
        };

        if !inserted {
            debug!(link = %tender.link, "duplicate tender skipped");
            return WriteOutcome::Duplicate;
        }

        let organisations = [
            (tender.organisation.as_deref(), OrganisationKind::Buyer),
            (tender.supplier.as_deref(), OrganisationKind::Supplier),
        ];
        for (name, kind) in organisations {
            let Some(name) = name else { continue };
            if let Err(e) = self.store.insert_organisation_if_absent(name, kind).await {
                warn!(organisation = name, %kind, error = %e, "failed to register organisation");
            }
        }

        WriteOutcome::Inserted
    }
}
