mod deltablocks;
mod error;

pub use deltablocks::{DeltaBlocksApiClient, DeltaBlocksApiServer, DeltaInfo, DeltaBlocksQuery};
pub use error::Error;

use std::sync::Arc;
use subcoin_deltablocks::DeltaBlocks;

/// Delta blocks RPC.
pub struct DeltaBlocksRpc {
    /// Read-only queries over the delta block DAG.
    pub deltablocks: DeltaBlocksQuery,
}

impl DeltaBlocksRpc {
    /// Creates a new instance of [`DeltaBlocksRpc`].
    pub fn new(deltablocks: Arc<DeltaBlocks>) -> Self {
        Self {
            deltablocks: DeltaBlocksQuery::new(deltablocks),
        }
    }

    /// Merges the delta blocks RPC components into a given RPC method registry.
    pub fn merge_into(
        self,
        module: &mut jsonrpsee::Methods,
    ) -> Result<(), jsonrpsee::server::RegisterMethodError> {
        let Self { deltablocks } = self;

        module.merge(deltablocks.into_rpc())?;

        Ok(())
    }
}
