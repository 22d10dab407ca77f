//! Weighted progress aggregation
//!
//! Each stage runs one task per image. Tasks report their own fraction in
//! [0, 1]; the aggregator folds them into a single overall fraction
//! weighted by task size and pushes it to a sink.

use std::sync::{Arc, Mutex, MutexGuard};

/// Receiver of the overall progress value
pub type ProgressSink = Arc<dyn Fn(f64) + Send + Sync>;

struct Inner {
    weights: Vec<f64>,
    total_weight: f64,
    progress: Vec<f64>,
}

impl Inner {
    fn overall(&self) -> f64 {
        if self.progress.is_empty() {
            return 0.0;
        }
        // All-zero weights degrade to an unweighted mean
        if self.total_weight <= 0.0 {
            return self.progress.iter().sum::<f64>() / self.progress.len() as f64;
        }
        self.progress
            .iter()
            .zip(&self.weights)
            .map(|(p, w)| p * w)
            .sum::<f64>()
            / self.total_weight
    }
}

/// Combines per-task progress into one weighted fraction
pub struct ProgressAggregator {
    inner: Arc<Mutex<Inner>>,
    sink: ProgressSink,
}

impl ProgressAggregator {
    /// One task per weight; weights are typically byte sizes
    pub fn new(weights: Vec<f64>, sink: impl Fn(f64) + Send + Sync + 'static) -> Self {
        let total_weight = weights.iter().sum();
        let progress = vec![0.0; weights.len()];
        Self {
            inner: Arc::new(Mutex::new(Inner {
                weights,
                total_weight,
                progress,
            })),
            sink: Arc::new(sink),
        }
    }

    /// `count` equally weighted tasks
    pub fn with_count(count: usize, sink: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self::new(vec![1.0; count], sink)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).progress.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handle for reporting the progress of task `index`, if it exists
    pub fn task(&self, index: usize) -> Option<TaskProgress> {
        (index < self.len()).then(|| self.handle(index))
    }

    /// Handles for every task, in order
    pub fn tasks(&self) -> Vec<TaskProgress> {
        (0..self.len()).map(|i| self.handle(i)).collect()
    }

    fn handle(&self, index: usize) -> TaskProgress {
        TaskProgress {
            index,
            inner: Arc::clone(&self.inner),
            sink: Arc::clone(&self.sink),
        }
    }

    /// Current overall fraction
    pub fn overall(&self) -> f64 {
        lock(&self.inner).overall()
    }
}

/// Progress callback for one task
#[derive(Clone)]
pub struct TaskProgress {
    index: usize,
    inner: Arc<Mutex<Inner>>,
    sink: ProgressSink,
}

impl TaskProgress {
    /// Record this task's fraction and publish the new overall value
    ///
    /// Returns `false` without publishing when the value is unchanged or
    /// not a finite number.
    pub fn set(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        let value = value.clamp(0.0, 1.0);
        let mut inner = lock(&self.inner);
        if inner.progress[self.index] == value {
            return false;
        }
        inner.progress[self.index] = value;
        (self.sink)(inner.overall());
        true
    }

    /// Boxed callback form, for APIs taking a plain progress function
    pub fn callback(&self) -> Box<dyn Fn(f64) + Send + Sync> {
        let task = self.clone();
        Box::new(move |value| {
            task.set(value);
        })
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<f64>>>, impl Fn(f64) + Send + Sync + 'static) {
        let values = Arc::new(Mutex::new(Vec::new()));
        let sink_values = Arc::clone(&values);
        (values, move |p| sink_values.lock().unwrap().push(p))
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_weighted_average() {
        let (values, sink) = recorder();
        let aggregator = ProgressAggregator::new(vec![100.0, 300.0], sink);
        let tasks = aggregator.tasks();

        tasks[0].set(1.0);
        assert_close(aggregator.overall(), 0.25);
        tasks[1].set(0.5);
        assert_close(aggregator.overall(), 0.25 + 0.375);
        tasks[1].set(1.0);
        assert_close(aggregator.overall(), 1.0);

        let values = values.lock().unwrap();
        assert_eq!(values.len(), 3);
        assert_close(values[0], 0.25);
        assert_close(values[1], 0.625);
        assert_close(values[2], 1.0);
    }

    #[test]
    fn test_unchanged_value_is_noop() {
        let (values, sink) = recorder();
        let aggregator = ProgressAggregator::new(vec![10.0, 10.0], sink);
        let task = aggregator.task(1).unwrap();

        assert!(task.set(0.4));
        assert!(!task.set(0.4));
        assert!(!aggregator.task(0).unwrap().set(0.0));
        assert_eq!(values.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_count_uses_equal_weights() {
        let (_, sink) = recorder();
        let aggregator = ProgressAggregator::with_count(4, sink);
        aggregator.task(0).unwrap().set(1.0);
        aggregator.task(3).unwrap().set(0.5);
        assert_close(aggregator.overall(), 1.5 / 4.0);
    }

    #[test]
    fn test_does_not_enforce_monotonicity() {
        let (values, sink) = recorder();
        let aggregator = ProgressAggregator::new(vec![1.0, 1.0], sink);
        let task = aggregator.task(0).unwrap();
        task.set(0.8);
        task.set(0.2);
        let values = values.lock().unwrap();
        assert_close(values[0], 0.4);
        assert_close(values[1], 0.1);
    }

    #[test]
    fn test_zero_weights_fall_back_to_mean() {
        let (_, sink) = recorder();
        let aggregator = ProgressAggregator::new(vec![0.0, 0.0], sink);
        aggregator.task(0).unwrap().set(1.0);
        assert_close(aggregator.overall(), 0.5);
    }

    #[test]
    fn test_callback_forwards_to_task() {
        let (values, sink) = recorder();
        let aggregator = ProgressAggregator::new(vec![2.0, 2.0], sink);
        let callback = aggregator.task(1).unwrap().callback();
        callback(1.0);
        callback(1.0);
        assert_eq!(*values.lock().unwrap(), vec![0.5]);
    }

    #[test]
    fn test_out_of_range_task_is_none() {
        let (_, sink) = recorder();
        let aggregator = ProgressAggregator::with_count(2, sink);
        assert!(aggregator.task(1).is_some());
        assert!(aggregator.task(2).is_none());
        assert!(ProgressAggregator::with_count(0, |_| {}).task(0).is_none());
    }

    #[test]
    fn test_non_finite_values_are_ignored() {
        let (values, sink) = recorder();
        let aggregator = ProgressAggregator::new(vec![1.0, 1.0], sink);
        let task = aggregator.task(0).unwrap();

        assert!(!task.set(f64::NAN));
        assert!(!task.set(f64::INFINITY));
        assert!(task.set(0.5));
        assert!(!task.set(f64::NAN));
        assert_close(aggregator.overall(), 0.25);
        assert_eq!(values.lock().unwrap().len(), 1);
    }
}
