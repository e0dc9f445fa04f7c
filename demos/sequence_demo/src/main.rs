// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runs a short cue-response block in real time.
//!
//! Each trial shows a fixation cross, then a cue, then waits for a response.
//! Responses come from a simulated participant scheduled on a host-side
//! [`Clock`] of boxed callbacks and delivered between ticks by
//! [`RealtimeLoop::run_with`]. Records go to stdout as JSON Lines and the
//! tick trace is exported as Chrome trace JSON.
//!
//! ```text
//! sequence_demo [config.json] [--pretty]
//! ```

use std::error::Error;
use std::fs::File;
use std::io::BufWriter;

use stagecue_core::clock::{Clock, When};
use stagecue_core::config::ExperimentConfig;
use stagecue_core::error::{BuildError, RunError};
use stagecue_core::experiment::Experiment;
use stagecue_core::state::{Drawable, DurationSpec, Phase, StateId};
use stagecue_core::time::{Duration, HostTime, TimeSource, Timebase};
use stagecue_core::trace::{
    FlipConfirmedEvent, FlipDiscardedEvent, FlipSubmitEvent, PhaseBeginEvent, PhaseEndEvent,
    StateTransitionEvent, TickEvent, TickSummary, TraceSink, Tracer,
};
use stagecue_core::value::Value;

use stagecue_debug::chrome;
use stagecue_debug::jsonl::JsonLinesSink;
use stagecue_debug::pretty::PrettyPrintSink;
use stagecue_debug::recorder::RecorderSink;

use stagecue_host::{HeadlessPresenter, RealtimeLoop, SystemTimeSource, load_config};

const TRACE_PATH: &str = "sequence_demo.trace.json";
/// Simulated response times, one per trial, in ms.
const RESPONSE_MS: [u64; 4] = [420, 380, 510, 295];

type HostCallback = Box<dyn FnMut(&mut Experiment, HostTime) -> Result<(), RunError>>;

/// Stands in for a drawn stimulus.
#[derive(Debug)]
struct Text(&'static str);

impl Drawable for Text {
    fn show(&mut self) {
        log::info!("show {}", self.0);
    }

    fn hide(&mut self) {
        log::info!("hide {}", self.0);
    }
}

/// Forwards every event to the recorder and, optionally, a pretty printer.
struct Tee {
    recorder: RecorderSink,
    pretty: Option<PrettyPrintSink>,
}

impl Tee {
    fn each(&mut self, mut f: impl FnMut(&mut dyn TraceSink)) {
        f(&mut self.recorder);
        if let Some(pretty) = &mut self.pretty {
            f(pretty);
        }
    }
}

impl TraceSink for Tee {
    fn on_tick(&mut self, e: &TickEvent) {
        self.each(|s| s.on_tick(e));
    }

    fn on_state_transition(&mut self, e: &StateTransitionEvent<'_>) {
        self.each(|s| s.on_state_transition(e));
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.each(|s| s.on_phase_begin(e));
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.each(|s| s.on_phase_end(e));
    }

    fn on_flip_submit(&mut self, e: &FlipSubmitEvent) {
        self.each(|s| s.on_flip_submit(e));
    }

    fn on_flip_confirmed(&mut self, e: &FlipConfirmedEvent) {
        self.each(|s| s.on_flip_confirmed(e));
    }

    fn on_flip_discarded(&mut self, e: &FlipDiscardedEvent) {
        self.each(|s| s.on_flip_discarded(e));
    }

    fn on_tick_summary(&mut self, s: &TickSummary) {
        self.each(|sink| sink.on_tick_summary(s));
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n, Timebase::NANOS)
}

/// Builds the block and returns the response state.
fn build(exp: &mut Experiment) -> Result<StateId, BuildError> {
    exp.build(|b| {
        let sides = b.refs().constant(Value::list(
            ["left", "right", "left", "right"].map(Value::from),
        ));
        let mut response = StateId::ROOT;
        b.loop_over("trials", sides, |b| {
            let body = b.parent();
            let trials = b.tree().parent(body).ok_or(BuildError::UnknownState(body))?;
            let side = b.attr(trials, "current")?;
            let fixation = b.visual("fixation", Box::new(Text("+")), DurationSpec::Fixed(ms(300)))?;
            b.set_jitter(fixation, ms(100))?;
            b.visual("cue", Box::new(Text("cue")), DurationSpec::Fixed(ms(150)))?;
            response = b.wait("response", DurationSpec::SelfPaced)?;
            b.log_attr(response, "side", side)?;
            b.debug("note", "trial", [("side", side)])?;
            Ok(())
        })?;
        Ok(response)
    })
}

/// Schedules the simulated participant: each response arrives a fixed time
/// after the response state starts.
fn participant(response: StateId) -> Clock<HostCallback> {
    let mut clock: Clock<HostCallback> = Clock::new();
    let mut trial = 0;
    clock.schedule(
        Box::new(move |exp, now| {
            if exp.tree().phase(response) != Some(Phase::Active) {
                return Ok(());
            }
            let Some(start) = exp.tree().start_time(response) else {
                return Ok(());
            };
            let rt = ms(RESPONSE_MS[trial % RESPONSE_MS.len()]);
            let pressed = start.saturating_add(rt);
            if now >= pressed {
                log::info!("response after {:.0} ms", rt.to_secs(exp.timebase()) * 1000.0);
                exp.cancel(response, pressed)?;
                trial += 1;
            }
            Ok(())
        }),
        When::EveryTick,
        None,
    );
    clock
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut config_path = None;
    let mut pretty = false;
    for arg in std::env::args().skip(1) {
        if arg == "--pretty" {
            pretty = true;
        } else {
            config_path = Some(arg);
        }
    }
    let config = match config_path {
        Some(path) => load_config(path)?,
        None => ExperimentConfig::default(),
    };
    log::info!("pacer refresh interval {:?}", config.pacer.refresh_interval);

    let time = SystemTimeSource::new();
    let records = JsonLinesSink::new(Box::new(std::io::stdout()) as Box<dyn std::io::Write>);
    let mut exp = Experiment::new(config, Box::new(time), Box::new(records));
    let response = build(&mut exp)?;

    let mut responses = participant(response);
    let mut presenter = HeadlessPresenter::new(time);
    let mut tee = Tee {
        recorder: RecorderSink::new(),
        pretty: pretty.then(|| PrettyPrintSink::stderr(time.timebase())),
    };
    let stats = RealtimeLoop::new(time).run_with(
        &mut exp,
        &mut presenter,
        &mut Tracer::new(&mut tee),
        |exp, now| {
            responses
                .run_due(now, |_, callback| callback(exp, now))
                .map(drop)
                .map_err(|batch| {
                    let mut failures = batch.failures.into_iter().map(|(_, e)| e);
                    let first = failures.next().unwrap_or(RunError::NotRunning);
                    for e in failures {
                        log::warn!("another response delivery failed: {e}");
                    }
                    first
                })
        },
    )?;
    log::info!(
        "{} ticks, {} flips, {:.1} ms asleep",
        stats.ticks,
        stats.flips,
        stats.slept.as_secs_f64() * 1000.0
    );

    let mut out = BufWriter::new(File::create(TRACE_PATH)?);
    chrome::export(tee.recorder.as_bytes(), time.timebase(), &mut out)?;
    log::info!("wrote {TRACE_PATH}");
    Ok(())
}
