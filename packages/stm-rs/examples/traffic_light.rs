//! Traffic light driven by timer commands.
//!
//! Run with: `RUST_LOG=stm=trace cargo run -p stm --example traffic_light`
//!
//! Set `STM_MACHINE_CONFIG='{"message_buffer_size": 4}'` to override the
//! machine configuration.

use std::time::Duration;

use stm::{
    timer, to_cmd, transition_to, CancellationToken, Cmd, Machine, MachineConfig, State,
    Transition,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CYCLES: u32 = 3;

#[derive(Debug, Clone, Copy)]
enum Light {
    Entered(&'static str),
    Elapsed,
}

struct Red {
    cycles: u32,
    done: CancellationToken,
}

struct Green {
    cycles: u32,
    done: CancellationToken,
}

struct Yellow {
    cycles: u32,
    done: CancellationToken,
}

impl State<Light> for Red {
    fn update(self: Box<Self>, msg: Light) -> Transition<Light> {
        match msg {
            Light::Entered(color) => {
                tracing::info!(color, cycles = self.cycles, "light changed");
                (self, Some(timer(Duration::from_millis(200), Light::Elapsed)))
            }
            Light::Elapsed if self.cycles >= CYCLES => {
                let done = self.done.clone();
                let stop = Cmd::new(move || async move {
                    done.cancel();
                    None
                });
                (self, Some(stop))
            }
            Light::Elapsed => transition_to(
                Green {
                    cycles: self.cycles + 1,
                    done: self.done,
                },
                [],
            ),
        }
    }

    fn init(&self) -> Option<Cmd<Light>> {
        Some(to_cmd(Light::Entered("red")))
    }
}

impl State<Light> for Green {
    fn update(self: Box<Self>, msg: Light) -> Transition<Light> {
        match msg {
            Light::Entered(color) => {
                tracing::info!(color, cycles = self.cycles, "light changed");
                (self, Some(timer(Duration::from_millis(300), Light::Elapsed)))
            }
            Light::Elapsed => transition_to(
                Yellow {
                    cycles: self.cycles,
                    done: self.done,
                },
                [],
            ),
        }
    }

    fn init(&self) -> Option<Cmd<Light>> {
        Some(to_cmd(Light::Entered("green")))
    }
}

impl State<Light> for Yellow {
    fn update(self: Box<Self>, msg: Light) -> Transition<Light> {
        match msg {
            Light::Entered(color) => {
                tracing::info!(color, cycles = self.cycles, "light changed");
                (self, Some(timer(Duration::from_millis(100), Light::Elapsed)))
            }
            Light::Elapsed => transition_to(
                Red {
                    cycles: self.cycles,
                    done: self.done,
                },
                [],
            ),
        }
    }

    fn init(&self) -> Option<Cmd<Light>> {
        Some(to_cmd(Light::Entered("yellow")))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stm=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config: MachineConfig = match std::env::var("STM_MACHINE_CONFIG") {
        Ok(raw) => serde_json::from_str(&raw)?,
        Err(_) => MachineConfig::default(),
    };

    let done = CancellationToken::new();
    let initial = Red {
        cycles: 0,
        done: done.clone(),
    };

    // The initial state's init is not run for us
    let init = initial.init();
    let machine = Machine::builder(initial)
        .with_name("traffic-light")
        .try_with_config(config)?
        .start(done.clone());
    machine.send(init);

    done.cancelled().await;
    machine.join().await?;

    tracing::info!("traffic light stopped");
    Ok(())
}
