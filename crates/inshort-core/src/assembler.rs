//! Primary plus best-effort sub-resource assembly

use std::sync::atomic::AtomicBool;

use inshort_store::AssembledRecord;

use crate::catalog::Catalog;
use crate::error::AssemblyError;
use crate::rate_limit::RateLimiter;

/// Builds one [`AssembledRecord`] per catalog item.
///
/// The primary fetch is mandatory. Sub-resource failures become `None`
/// entries and never abort the record.
pub struct RecordAssembler<'a, C: Catalog> {
    catalog: &'a C,
    limiter: &'a RateLimiter,
    shutdown: Option<&'a AtomicBool>,
}

impl<'a, C: Catalog> RecordAssembler<'a, C> {
    pub fn new(catalog: &'a C, limiter: &'a RateLimiter) -> Self {
        Self {
            catalog,
            limiter,
            shutdown: None,
        }
    }

    /// Abandon quota waits once `flag` is raised.
    pub fn with_shutdown(mut self, flag: &'a AtomicBool) -> Self {
        self.shutdown = Some(flag);
        self
    }

    fn permit(&self) -> Result<(), AssemblyError> {
        match self.shutdown {
            Some(flag) => self
                .limiter
                .wait_if_needed_until(flag)
                .map(drop)
                .ok_or(AssemblyError::Interrupted),
            None => {
                self.limiter.wait_if_needed();
                Ok(())
            }
        }
    }

    pub fn assemble(&self, item: &C::Item) -> Result<AssembledRecord, AssemblyError> {
        let key = self
            .catalog
            .item_key(item)
            .ok_or(AssemblyError::MissingKey)?;

        self.permit()?;
        let primary = self.catalog.fetch_primary(item)?;
        let mut record = AssembledRecord::new(key, primary);

        for endpoint in self.catalog.sub_resources() {
            self.permit()?;
            let value = match self.catalog.fetch_sub_resource(item, endpoint) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::debug!("{}: {endpoint} unavailable: {e}", record.key);
                    None
                }
            };
            record
                .sub_resources
                .insert(self.catalog.sub_resource_field(endpoint), value);
        }

        log::debug!(
            "{}: assembled with {}/{} sub-resources",
            record.key,
            record.populated_sub_resources(),
            record.sub_resources.len()
        );
        Ok(record)
    }
}
