use std::{
    fmt::{self, Debug},
    sync::Arc,
};

use crate::{
    native::{self, Driver},
    Error,
};

/// Host-visible signal of submission completion.
pub struct Fence {
    driver: Arc<dyn Driver>,
    handle: native::Fence,
}

impl Fence {
    pub(crate) fn new(driver: &Arc<dyn Driver>, signaled: bool) -> Result<Self, Error> {
        let handle = driver.create_fence(signaled)?;
        tracing::debug!("Fence {:?} created", handle);

        Ok(Fence {
            driver: driver.clone(),
            handle,
        })
    }

    #[inline]
    pub fn handle(&self) -> native::Fence {
        self.handle
    }

    /// Returns `true` if the fence is signaled.
    pub fn signaled(&self) -> Result<bool, Error> {
        Ok(self.driver.fence_status(self.handle)?)
    }

    /// Returns fence to unsignaled state.
    pub fn reset(&self) -> Result<(), Error> {
        self.driver.reset_fences(&[self.handle])?;
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        tracing::debug!("Fence {:?} destroyed", self.handle);
        self.driver.destroy_fence(self.handle);
    }
}

impl Debug for Fence {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "Fence({:#x})", self.handle.0)
    }
}
