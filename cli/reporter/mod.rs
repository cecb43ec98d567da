use indicatif::{ProgressBar, ProgressStyle};
use kiln_core::events::event::*;
use kiln_core::events::{EventChannel, EventConsumer};
use kiln_core::{JobHandle, JobId, JobStatus};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

trait Reporter {
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Noop => (),
            Event::JobEvent(e) => self.on_job_event(e),
            Event::QueueEvent(e) => self.on_queue_event(e),
            Event::CacheEvent(e) => self.on_cache_event(e),
            Event::SchedulerEvent(e) => self.on_scheduler_event(e),
        }
    }

    fn on_job_event(&mut self, _event: JobEvent) {}
    fn on_queue_event(&mut self, _event: QueueEvent) {}
    fn on_cache_event(&mut self, _event: CacheEvent) {}
    fn on_scheduler_event(&mut self, _event: SchedulerEvent) {}
}

/// Prints what happens to a job (and everything it starts) until it finishes.
pub struct StatusReporter {
    started_at: Instant,
    event_consumer: EventConsumer,
    root: Option<JobId>,
    running: BTreeSet<String>,
    finished: usize,
    errors: usize,
    pb: ProgressBar,
}

impl StatusReporter {
    pub fn new(event_channel: Arc<EventChannel>, prefix: &'static str) -> StatusReporter {
        let style = ProgressStyle::default_bar()
            .template("{prefix:>12.cyan.bold} [{bar:25}] {pos}/{len} {wide_msg}")
            .progress_chars("=> ");

        let pb = ProgressBar::new(0);
        pb.set_style(style);
        pb.set_prefix(prefix);

        StatusReporter {
            started_at: Instant::now(),
            event_consumer: event_channel.consumer(),
            root: None,
            running: BTreeSet::default(),
            finished: 0,
            errors: 0,
            pb,
        }
    }

    /// Report on events until `job` reaches a terminal state, and return that state.
    pub async fn run(mut self, job: Arc<dyn JobHandle>) -> JobStatus {
        self.root = Some(job.id());
        let mut done = job.wait_status();
        loop {
            tokio::select! {
                status = &mut done => {
                    self.drain();
                    self.finish(job.label(), &status);
                    return status;
                }
                _ = tokio::time::sleep(Duration::from_millis(25)) => self.drain(),
            }
        }
    }

    fn drain(&mut self) {
        for event in self.event_consumer.drain() {
            debug!("{:?}", event);
            self.handle_event(event);
        }
    }

    fn finish(&self, label: &str, status: &JobStatus) {
        let green_bold = console::Style::new().green().bold();
        let yellow = console::Style::new().yellow();
        let red_bold = console::Style::new().red().bold();

        self.pb.finish_and_clear();
        let elapsed = self.started_at.elapsed().as_millis();
        let line = match status {
            JobStatus::Succeeded => format!(
                "{:>12} {} in {}ms ({} jobs finished)",
                green_bold.apply_to("Finished"),
                label,
                elapsed,
                self.finished
            ),
            JobStatus::Cancelled(reason) => format!(
                "{:>12} {} after {}ms: {}",
                yellow.apply_to("Cancelled"),
                label,
                elapsed,
                reason
            ),
            _ => format!(
                "{:>12} {} in {}ms ({} errors)",
                red_bold.apply_to("Failed"),
                label,
                elapsed,
                self.errors.max(1)
            ),
        };
        println!("{}", line);
    }

    fn print(&self, line: String) {
        if self.pb.is_hidden() {
            println!("{}", line);
        } else {
            self.pb.println(line);
        }
    }

    fn update_message(&self) {
        let running: Vec<&str> = self.running.iter().map(String::as_str).collect();
        self.pb.set_message(format!(" {}", running.join(", ")));
    }
}

impl Reporter for StatusReporter {
    fn on_job_event(&mut self, event: JobEvent) {
        let green_bold = console::Style::new().green().bold();
        let yellow = console::Style::new().yellow();
        let red_bold = console::Style::new().red().bold();

        match event {
            JobEvent::JobProgressed {
                id,
                completed,
                total,
                ..
            } if Some(id) == self.root => {
                self.pb.set_length(total);
                self.pb.set_position(completed);
            }
            JobEvent::JobStateChanged { id, .. } if Some(id) == self.root => (),
            JobEvent::JobStateChanged {
                label,
                status,
                error,
                ..
            } => match status.as_str() {
                "running" => {
                    self.running.insert(label);
                    self.update_message();
                }
                "succeeded" => {
                    self.running.remove(&label);
                    self.finished += 1;
                    self.print(format!("{:>12} {}", green_bold.apply_to("Finished"), label));
                    self.update_message();
                }
                "cancelled" => {
                    self.running.remove(&label);
                    self.print(format!("{:>12} {}", yellow.apply_to("Cancelled"), label));
                    self.update_message();
                }
                "failed" => {
                    self.running.remove(&label);
                    self.errors += 1;
                    self.print(format!(
                        "{:>12} {}: {}",
                        red_bold.apply_to("Failed"),
                        label,
                        error.unwrap_or_default()
                    ));
                    self.update_message();
                }
                _ => (),
            },
            _ => (),
        }
    }

    fn on_queue_event(&mut self, event: QueueEvent) {
        let blue_dim = console::Style::new().blue();
        if let QueueEvent::JobEnqueued { label, .. } = event {
            self.print(format!("{:>12} {}", blue_dim.apply_to("Queued"), label));
        }
    }

    fn on_cache_event(&mut self, event: CacheEvent) {
        let purple = console::Style::new().magenta().bright();
        let blue_dim = console::Style::new().blue();
        let yellow = console::Style::new().yellow();

        let line = match event {
            CacheEvent::ResourceHit { key } => {
                format!("{:>12} {}", blue_dim.apply_to("Cache-hit"), key)
            }
            CacheEvent::ResourceConstructionStarted { key, mode } => {
                format!("{:>12} {} ({})", purple.apply_to("Loading"), key, mode)
            }
            CacheEvent::ResourceEvicted { key, next_mode } => format!(
                "{:>12} {}, next attempt uses {}",
                yellow.apply_to("Evicted"),
                key,
                next_mode
            ),
            CacheEvent::ResourceDroppedForRetry { key, next_mode } => format!(
                "{:>12} {}, next attempt uses {}",
                yellow.apply_to("Dropped"),
                key,
                next_mode
            ),
        };
        self.print(line);
    }
}
