//! How many worker threads a run may use.

/// Source of the parallelism limits the executor sizes its pool with.
pub trait ParallelismProvider: Send + Sync {
    /// Threads usable right now, at least 1.
    fn available_threads(&self) -> usize;

    /// Whether the crate was built with a thread pool at all.
    fn has_parallel_support(&self) -> bool;
}

/// Logical CPUs of the machine, optionally capped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemParallelism {
    pub thread_limit: Option<usize>,
}

impl SystemParallelism {
    pub fn new(thread_limit: Option<usize>) -> Self {
        Self { thread_limit }
    }
}

impl ParallelismProvider for SystemParallelism {
    fn available_threads(&self) -> usize {
        let logical_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        match self.thread_limit {
            Some(limit) => logical_threads.min(limit).max(1),
            None => logical_threads,
        }
    }

    fn has_parallel_support(&self) -> bool {
        cfg!(feature = "parallel")
    }
}

/// Fixed answer, for tests and embedding.
#[derive(Debug, Clone, Copy)]
pub struct FixedParallelism(pub usize);

impl ParallelismProvider for FixedParallelism {
    fn available_threads(&self) -> usize {
        self.0.max(1)
    }

    fn has_parallel_support(&self) -> bool {
        cfg!(feature = "parallel")
    }
}

/// Worker count for `jobs` units of work: never above either bound, never 0.
pub fn worker_count(provider: &dyn ParallelismProvider, requested: usize, jobs: usize) -> usize {
    if !provider.has_parallel_support() {
        return 1;
    }
    let requested = if requested == 0 {
        usize::MAX
    } else {
        requested
    };
    provider
        .available_threads()
        .min(requested)
        .min(jobs)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_caps_available_threads() {
        assert_eq!(SystemParallelism::new(Some(1)).available_threads(), 1);
        assert!(SystemParallelism::default().available_threads() >= 1);
        assert_eq!(SystemParallelism::new(Some(0)).available_threads(), 1);
    }

    #[test]
    fn worker_count_respects_every_bound() {
        let provider = FixedParallelism(8);
        if provider.has_parallel_support() {
            assert_eq!(worker_count(&provider, 4, 100), 4);
            assert_eq!(worker_count(&provider, 0, 100), 8);
            assert_eq!(worker_count(&provider, 16, 3), 3);
        }
        assert_eq!(worker_count(&provider, 4, 0), 1);
        assert_eq!(worker_count(&FixedParallelism(0), 4, 10), 1);
    }
}
