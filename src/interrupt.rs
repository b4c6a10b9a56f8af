use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::errors::{Errors, Result};

/// Externally owned cancellation flag for long-running index work.
///
/// Clones share the same flag; any holder may call [`Interrupt::kill`].
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    killed: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_killed() {
            return Err(Errors::Interrupted);
        }
        Ok(())
    }
}

/// 仅每 interval 次调用检查一次中断信号
pub(crate) struct RarelyCheck<'a> {
    interrupt: Option<&'a Interrupt>,
    interval: usize,
    ticks: usize,
}

impl<'a> RarelyCheck<'a> {
    pub(crate) fn new(interrupt: Option<&'a Interrupt>, interval: usize) -> Self {
        Self {
            interrupt,
            interval: interval.max(1),
            ticks: 0,
        }
    }

    pub(crate) fn tick(&mut self) -> Result<()> {
        self.ticks += 1;
        if self.ticks % self.interval != 0 {
            return Ok(());
        }
        match self.interrupt {
            Some(interrupt) => interrupt.check(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_shared_between_clones() {
        let interrupt = Interrupt::new();
        let other = interrupt.clone();
        assert_eq!(other.check(), Ok(()));
        interrupt.kill();
        assert_eq!(other.check(), Err(Errors::Interrupted));
    }

    #[test]
    fn test_rarely_check() {
        let interrupt = Interrupt::new();
        interrupt.kill();
        let mut rarely = RarelyCheck::new(Some(&interrupt), 3);
        assert_eq!(rarely.tick(), Ok(()));
        assert_eq!(rarely.tick(), Ok(()));
        assert_eq!(rarely.tick(), Err(Errors::Interrupted));

        let mut never = RarelyCheck::new(None, 1);
        assert_eq!(never.tick(), Ok(()));
    }
}
