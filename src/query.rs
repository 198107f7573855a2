use std::sync::{Arc, Weak};

use anyhow::Context;
use ash::vk;

use crate::{
    device::{self, Device},
    error::Error,
};

pub struct QueryPool {
    pub handle: vk::QueryPool,
    pub query_type: vk::QueryType,
    pub query_count: u32,
    device: Weak<Device>,
}

impl QueryPool {
    pub fn builder() -> QueryPoolBuilder {
        QueryPoolBuilder::default()
    }

    /// Reads `query_count` 64-bit results starting at `first_query`, waiting
    /// for them to become available.
    pub fn results(&self, first_query: u32, query_count: u32) -> anyhow::Result<Vec<u64>> {
        let device = device::upgrade(&self.device)?;
        let mut data = vec![0u64; query_count as usize];
        unsafe {
            device.handle.get_query_pool_results(
                self.handle,
                first_query,
                query_count,
                &mut data,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
        }
        .context("vkGetQueryPoolResults")?;
        Ok(data)
    }
}

impl Drop for QueryPool {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping query pool {:?}", self.handle);
                unsafe { device.handle.destroy_query_pool(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before query pool {:?}, leaking it", self.handle),
        }
    }
}

pub struct QueryPoolBuilder {
    device: Option<Weak<Device>>,
    query_type: vk::QueryType,
    query_count: u32,
    pipeline_statistics: vk::QueryPipelineStatisticFlags,
}

impl Default for QueryPoolBuilder {
    fn default() -> Self {
        Self {
            device: None,
            query_type: vk::QueryType::TIMESTAMP,
            query_count: 0,
            pipeline_statistics: vk::QueryPipelineStatisticFlags::empty(),
        }
    }
}

impl QueryPoolBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn query_type(mut self, query_type: vk::QueryType) -> Self {
        self.query_type = query_type;
        self
    }

    pub fn query_count(mut self, query_count: u32) -> Self {
        self.query_count = query_count;
        self
    }

    pub fn pipeline_statistics(mut self, flags: vk::QueryPipelineStatisticFlags) -> Self {
        self.pipeline_statistics = flags;
        self
    }

    pub fn build(self) -> anyhow::Result<QueryPool> {
        let device = device::resolve(&self.device, "QueryPool")?;
        if self.query_count == 0 {
            return Err(Error::MissingField {
                builder: "QueryPool",
                field: "query_count",
            }
            .into());
        }
        let create_info = vk::QueryPoolCreateInfo::builder()
            .query_type(self.query_type)
            .query_count(self.query_count)
            .pipeline_statistics(self.pipeline_statistics);
        let handle = unsafe { device.handle.create_query_pool(&create_info, None) }
            .context("QueryPool::build: vkCreateQueryPool")?;
        tracing::debug!(
            "Created query pool {:?} ({:?} x{})",
            handle,
            self.query_type,
            self.query_count
        );
        Ok(QueryPool {
            handle,
            query_type: self.query_type,
            query_count: self.query_count,
            device: Arc::downgrade(&device),
        })
    }
}
