use crate::evaluate::ResultRow;

/// Observer for reporting progress through the splits of a run.
pub trait RunProgressObserver {
    fn on_run_start(&mut self, total_splits: usize) {
        let _ = total_splits;
    }
    fn on_split_start(&mut self, split: usize) {
        let _ = split;
    }
    fn on_split_finish(&mut self, row: &ResultRow) {
        let _ = row;
    }
    fn on_run_finish(&mut self) {}
}

#[derive(Default)]
pub struct NoopRunProgress;

impl RunProgressObserver for NoopRunProgress {}
