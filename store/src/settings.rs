use arena::ArenaSettings;

use crate::handle::{HEAP_BASE, STACK_ORIGIN};

/// Configuration for a [`Store`](crate::Store).
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub arena: ArenaSettings,
    /// Heap slots added at once when the free list runs dry.
    pub heap_chunk: usize,
    /// Stack slots reserved up front.
    pub initial_stack: usize,
    /// Hard limit on stack depth.
    pub max_stack: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            arena: ArenaSettings::default(),
            heap_chunk: 256,
            initial_stack: 1024,
            max_stack: 1 << 20,
        }
    }
}

impl StoreSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        self.arena.validate()?;
        if self.heap_chunk == 0 {
            return Err("heap_chunk must be > 0");
        }
        if self.max_stack == 0 {
            return Err("max_stack must be > 0");
        }
        if self.initial_stack > self.max_stack {
            return Err("initial_stack must not exceed max_stack");
        }
        if self.max_stack > (HEAP_BASE - STACK_ORIGIN) as usize {
            return Err("max_stack exceeds the stack handle range");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(StoreSettings::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let settings = StoreSettings {
            heap_chunk: 0,
            ..StoreSettings::default()
        };
        assert_eq!(settings.validate(), Err("heap_chunk must be > 0"));

        let settings = StoreSettings {
            initial_stack: 10,
            max_stack: 5,
            ..StoreSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = StoreSettings {
            max_stack: usize::MAX,
            initial_stack: 0,
            ..StoreSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
