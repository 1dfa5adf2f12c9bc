use std::time::Duration;

/// Counters collected over one participant session.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub total_time: Option<Duration>,
    pub batch_times: Vec<Duration>,
    pub examples_processed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub checkpoints_written: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_total_time(&mut self, duration: Duration) {
        self.total_time = Some(duration);
    }

    pub fn record_batch(&mut self, duration: Duration, examples: usize) {
        self.batch_times.push(duration);
        self.examples_processed += examples as u64;
    }

    pub fn record_bytes_read(&mut self, bytes: u64) {
        self.bytes_read += bytes;
    }

    pub fn record_bytes_written(&mut self, bytes: u64) {
        self.bytes_written += bytes;
    }

    pub fn record_checkpoint(&mut self) {
        self.checkpoints_written += 1;
    }

    pub fn batches_processed(&self) -> usize {
        self.batch_times.len()
    }

    pub fn average_batch_time(&self) -> Option<Duration> {
        if self.batch_times.is_empty() {
            return None;
        }
        let total: Duration = self.batch_times.iter().sum();
        Some(total / self.batch_times.len() as u32)
    }

    pub fn examples_per_sec(&self) -> Option<f64> {
        let total: Duration = self.batch_times.iter().sum();
        let seconds = total.as_secs_f64();
        if seconds > 0.0 {
            Some(self.examples_processed as f64 / seconds)
        } else {
            None
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Session Results ===");

        if let Some(total_time) = self.total_time {
            println!("Total Time: {:?}", total_time);
        }

        println!("Batches Processed: {}", self.batches_processed());
        println!("Examples Processed: {}", self.examples_processed);

        // Use KB for smaller values, MB for larger ones
        if self.bytes_read < 1024 * 1024 {
            println!("Bytes Read: {:.2} KB", self.bytes_read as f64 / 1024.0);
        } else {
            println!(
                "Bytes Read: {:.2} MB",
                self.bytes_read as f64 / (1024.0 * 1024.0)
            );
        }

        if self.bytes_written < 1024 * 1024 {
            println!("Bytes Written: {:.2} KB", self.bytes_written as f64 / 1024.0);
        } else {
            println!(
                "Bytes Written: {:.2} MB",
                self.bytes_written as f64 / (1024.0 * 1024.0)
            );
        }

        if let Some(avg) = self.average_batch_time() {
            println!("Average Batch Time: {:?}", avg);
        }

        if let Some(rate) = self.examples_per_sec() {
            println!("Throughput: {:.2} examples/s", rate);
        }

        if self.checkpoints_written > 0 {
            println!("Checkpoints Written: {}", self.checkpoints_written);
        }

        println!("=======================\n");
    }
}
