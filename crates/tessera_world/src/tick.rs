//! The frame loop.
//!
//! Each call to [`World::progress`]:
//!
//! 1. Determines the frame's delta time (given, or measured).
//! 2. Rebuilds the pipeline if phases or systems changed.
//! 3. Runs every enabled system once, in pipeline order, applying each
//!    system's commands before the next one starts.
//! 4. Sleeps out the rest of the frame budget when a target frame rate is set.

use std::time::{Duration, Instant};

use tracing::{debug, debug_span, info, warn};

use crate::world::World;

const FALLBACK_DELTA: f32 = 1.0 / 60.0;

/// Frame counters.
#[derive(Debug, Clone, Default)]
pub(crate) struct FrameTime {
    pub tick: u64,
    pub world_time: f64,
    pub delta_time: f32,
    /// Start of the previous frame.
    pub last_frame: Option<Instant>,
}

impl World {
    /// Runs one frame.
    ///
    /// A `delta_time` of zero (or less) is replaced by the wall-clock time
    /// since the previous frame. Returns `false` once [`World::quit`] was
    /// requested.
    pub fn progress(&mut self, delta_time: f32) -> bool {
        let start = Instant::now();
        let dt = if delta_time > 0.0 {
            delta_time
        } else {
            self.measured_delta(start)
        };
        self.time.last_frame = Some(start);
        self.time.tick += 1;
        self.time.delta_time = dt;
        self.time.world_time += f64::from(dt);

        if self.pipeline_dirty {
            self.rebuild_pipeline();
        }

        let tick = self.time.tick;
        let span = debug_span!("frame", tick);
        let _guard = span.enter();
        debug!(tick, dt, systems = self.pipeline.len(), "frame start");

        let pipeline = self.pipeline.clone();
        for key in pipeline {
            self.run_scheduled(key, dt);
        }

        debug!(tick, quit = self.quit_requested, "frame end");
        self.pace(start);
        !self.quit_requested
    }

    fn measured_delta(&self, now: Instant) -> f32 {
        match self.time.last_frame {
            Some(previous) => now.duration_since(previous).as_secs_f32(),
            None if self.config.target_fps > 0.0 => 1.0 / self.config.target_fps,
            None => FALLBACK_DELTA,
        }
    }

    fn pace(&self, start: Instant) {
        if self.config.target_fps <= 0.0 {
            return;
        }
        let Ok(budget) = Duration::try_from_secs_f32(1.0 / self.config.target_fps) else {
            return;
        };
        let elapsed = start.elapsed();
        if elapsed < budget {
            std::thread::sleep(budget - elapsed);
        } else {
            warn!(
                tick = self.time.tick,
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                "frame exceeded time budget"
            );
        }
    }

    /// Calls [`World::progress`] with measured time until quit is requested.
    /// Returns the number of frames run.
    pub fn run(&mut self) -> u64 {
        info!(target_fps = self.config.target_fps, "starting frame loop");
        let first = self.time.tick;
        while self.progress(0.0) {}
        let frames = self.time.tick - first;
        info!(frames, exit_code = self.exit_code, "frame loop complete");
        frames
    }

    /// Makes the current or next `progress` return `false`.
    pub fn quit(&mut self) {
        self.quit_with(0);
    }

    pub fn quit_with(&mut self, code: i32) {
        self.quit_requested = true;
        self.exit_code = code;
    }

    #[must_use]
    pub fn should_quit(&self) -> bool {
        self.quit_requested
    }

    /// Number of frames run.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.time.tick
    }

    /// Delta time of the last frame.
    #[must_use]
    pub fn delta_time(&self) -> f32 {
        self.time.delta_time
    }

    /// Sum of all frame delta times.
    #[must_use]
    pub fn world_time(&self) -> f64 {
        self.time.world_time
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::WorldConfig;
    use crate::system::SystemDesc;

    #[test]
    fn test_progress_advances_time() {
        let mut world = World::new();
        assert_eq!(world.tick(), 0);
        assert!(world.progress(0.5));
        assert!(world.progress(0.25));
        assert_eq!(world.tick(), 2);
        assert_eq!(world.delta_time(), 0.25);
        assert_eq!(world.world_time(), 0.75);
    }

    #[test]
    fn test_zero_delta_is_measured() {
        let mut world = World::new();
        world.progress(0.0);
        assert_eq!(world.delta_time(), FALLBACK_DELTA);
        std::thread::sleep(Duration::from_millis(5));
        world.progress(0.0);
        assert!(world.delta_time() >= 0.005);
    }

    #[test]
    fn test_invalid_fps_disables_pacing() {
        for fps in [f32::NAN, f32::INFINITY, -30.0] {
            let mut world = World::with_config(WorldConfig {
                target_fps: fps,
                ..WorldConfig::default()
            });
            assert_eq!(world.config().target_fps, 0.0);
            assert!(world.progress(0.0));
            assert_eq!(world.delta_time(), FALLBACK_DELTA);
        }
    }

    #[test]
    fn test_interval_systems_accumulate_time() {
        let mut world = World::new();
        let runs = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&runs);
        world
            .system(
                SystemDesc::new("Slow", move |it| seen.lock().unwrap().push(it.delta_system_time()))
                    .interval(1.0),
            )
            .unwrap();
        for _ in 0..8 {
            world.progress(0.25);
        }
        assert_eq!(*runs.lock().unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_disabled_systems_do_not_run() {
        let mut world = World::new();
        let runs = Arc::new(Mutex::new(0));
        let seen = Arc::clone(&runs);
        let system = world
            .system(SystemDesc::new("Counter", move |_| *seen.lock().unwrap() += 1))
            .unwrap();
        world.progress(0.1);
        world.enable_system(system, false).unwrap();
        world.progress(0.1);
        world.enable_system(system, true).unwrap();
        world.progress(0.1);
        assert_eq!(*runs.lock().unwrap(), 2);
    }

    #[test]
    fn test_delta_system_time_spans_disabled_frames() {
        let mut world = World::new();
        let deltas = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&deltas);
        let system = world
            .system(SystemDesc::new("Track", move |it| seen.lock().unwrap().push(it.delta_system_time())))
            .unwrap();
        world.progress(0.5);
        world.enable_system(system, false).unwrap();
        world.progress(0.5);
        world.enable_system(system, true).unwrap();
        world.progress(0.5);
        assert_eq!(*deltas.lock().unwrap(), vec![0.5, 1.0]);
    }

    #[test]
    fn test_quit_from_a_system() {
        let mut world = World::new();
        world
            .system(SystemDesc::new("Stop", |it| {
                it.commands().quit_with(2);
            }))
            .unwrap();
        assert!(!world.progress(0.1));
        assert!(world.should_quit());
        assert_eq!(world.fini(), 2);
    }

    #[test]
    fn test_run_until_quit() {
        let mut world = World::with_config(WorldConfig {
            target_fps: 1000.0,
            ..WorldConfig::default()
        });
        world
            .system(SystemDesc::new("Countdown", |it| {
                if it.world().tick() >= 3 {
                    it.commands().quit();
                }
            }))
            .unwrap();
        assert_eq!(world.run(), 3);
    }
}
