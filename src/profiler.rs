//! Execution profiler for the interpreter. Counts the instructions a run
//! executes and keeps track of loop entries, i.e. jumps that land on a label
//! at or before the jumping instruction. When a loop entry exceeds the
//! threshold it is considered hot and reported after the run.
use std::collections::HashMap;

/// A loop header: a label inside a method that was jumped back to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopHeader {
    pub method: String,
    pub label: String,
}

#[derive(Debug)]
pub struct Profiler {
    // Threshold before a loop entry is considered hot.
    threshold: usize,
    // Instructions executed in the current run.
    steps: u64,
    // Record of loop entries and their access counts.
    records: HashMap<LoopHeader, usize>,
}

impl Profiler {
    pub fn new(threshold: usize) -> Profiler {
        Profiler {
            threshold,
            steps: 0,
            records: HashMap::new(),
        }
    }

    /// Counts one executed instruction and returns the running total.
    pub fn count_step(&mut self) -> u64 {
        self.steps += 1;
        self.steps
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Records a jump from line `from` to label `label` found at line `to`.
    pub fn count_jump(&mut self, method: &str, label: &str, from: usize, to: usize) {
        if to > from {
            return;
        }
        let header = LoopHeader {
            method: method.to_string(),
            label: label.to_string(),
        };
        *self.records.entry(header).or_insert(0) += 1;
    }

    pub fn entries(&self, header: &LoopHeader) -> usize {
        self.records.get(header).copied().unwrap_or(0)
    }

    pub fn is_hot(&self, header: &LoopHeader) -> bool {
        self.entries(header) > self.threshold
    }

    /// Hot loops, most entered first.
    pub fn hot_loops(&self) -> Vec<(&LoopHeader, usize)> {
        let mut hot: Vec<_> = self
            .records
            .iter()
            .filter(|(header, _)| self.is_hot(header))
            .map(|(header, count)| (header, *count))
            .collect();
        hot.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        hot
    }

    pub fn reset(&mut self) {
        self.steps = 0;
        self.records.clear();
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_backward_jumps_are_loop_entries() {
        let mut profiler = Profiler::new(2);
        let header = LoopHeader {
            method: "LFoo;->loop()V".to_string(),
            label: "goto_0".to_string(),
        };
        profiler.count_jump("LFoo;->loop()V", "cond_0", 10, 20);
        assert!(profiler.hot_loops().is_empty());
        for _ in 0..3 {
            profiler.count_jump("LFoo;->loop()V", "goto_0", 20, 10);
        }
        assert_eq!(profiler.entries(&header), 3);
        assert!(profiler.is_hot(&header));
        assert_eq!(profiler.hot_loops(), vec![(&header, 3)]);
        assert_eq!(profiler.count_step(), 1);
        profiler.reset();
        assert_eq!(profiler.steps(), 0);
        assert!(!profiler.is_hot(&header));
    }
}
