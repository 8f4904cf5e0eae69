use crate::config::MmuConfig;
use crate::context::{Context, MmuContext};
use crate::error::MmuError;
use crate::hop0::Hop0Region;
use crate::pool::HopPool;
use crate::PteIo;
use log::{debug, error};

/// Device-wide page-table state shared by all contexts.
///
/// Contexts borrow the `Mmu`, so it outlives every address space created
/// from it.
pub struct Mmu<D: PteIo> {
    config: MmuConfig,
    io: D,
    pool: HopPool,
    hop0: Hop0Region,
}

impl<D: PteIo> Mmu<D> {
    /// Validates `config`, creates the hop pool over the non-root part of the
    /// page-table region and allocates the zeroed root tables.
    ///
    /// # Errors
    /// * [`MmuError::Config`] if the configuration is inconsistent.
    /// * [`MmuError::Pool`] if the pool region is unusable.
    /// * [`MmuError::ShadowOutOfMemory`] if the root tables cannot be allocated.
    pub fn init(config: MmuConfig, io: D) -> Result<Self, MmuError> {
        config.validate()?;

        let pool = HopPool::new(config.pool_base(), config.pool_size(), config.hop_table_size())
            .inspect_err(|e| error!("Failed to create the hop pool: {e}"))?;
        let hop0 = Hop0Region::new(config.max_asid())?;

        debug!(
            "MMU initialized: {} hops at {}, {} address spaces",
            pool.capacity(),
            pool.base(),
            config.max_asid()
        );

        Ok(Self {
            config,
            io,
            pool,
            hop0,
        })
    }

    /// Creates the address space of `asid`.
    ///
    /// User contexts get the DRAM default mapping when the configuration
    /// enables it.
    ///
    /// # Errors
    /// * [`MmuError::AsidOutOfRange`] / [`MmuError::AsidInUse`] for an unusable ASID.
    /// * Any allocation error of the default mapping; the ASID stays free.
    pub fn ctx_init(&self, asid: u32) -> Result<Context<'_, D>, MmuError> {
        let root = self.hop0.claim(asid)?;
        let mut ctx = MmuContext::new(self, asid, root);
        // on failure, dropping `ctx` hands the root back
        ctx.init_default_mapping()?;
        Ok(Context::new(ctx))
    }

    #[inline]
    pub const fn config(&self) -> &MmuConfig {
        &self.config
    }

    #[inline]
    pub const fn io(&self) -> &D {
        &self.io
    }

    #[inline]
    pub const fn pool(&self) -> &HopPool {
        &self.pool
    }

    /// ASIDs not held by a live context.
    pub fn free_asids(&self) -> usize {
        self.hop0.free_slots()
    }

    pub(crate) const fn hop0(&self) -> &Hop0Region {
        &self.hop0
    }
}

impl<D: PteIo> core::fmt::Debug for Mmu<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mmu")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
