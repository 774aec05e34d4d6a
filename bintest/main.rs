//! Blink one line while watching another.
//!
//! Usage: `rpio [BLINK_LINE] [WATCH_LINE]`, BCM numbering. Defaults to J8
//! pins 16 and 15, so jumpering those two makes every blink show up as an
//! edge.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use rpio::{j8, Edge, Gpio};

fn line_arg(arg: Option<String>, default: u8) -> anyhow::Result<u8> {
    match arg {
        None => Ok(default),
        Some(arg) => {
            let line: u8 = arg.parse().with_context(|| format!("bad line number {arg:?}"))?;
            if line >= rpio::MAX_LINES {
                bail!("line {line} out of range");
            }
            Ok(line)
        }
    }
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let blink = line_arg(args.next(), j8::J8_16)?;
    let watch = line_arg(args.next(), j8::J8_15)?;

    let gpio = Gpio::default();
    gpio.open().context("mapping gpio registers")?;
    println!("chip: {}", gpio.chip().map(|c| c.to_string()).unwrap_or_default());

    let mut led = gpio.pin(blink)?;
    led.low()?;
    led.output()?;

    let sense = gpio.pin(watch)?;
    sense.input()?;
    let edges = Arc::new(AtomicUsize::new(0));
    let seen = edges.clone();
    sense
        .watch(Edge::Both, move |pin| {
            let n = seen.fetch_add(1, Ordering::Relaxed);
            match pin.read() {
                Ok(level) => println!("gpio{} #{n}: {level:?}", pin.line()),
                Err(err) => println!("gpio{} #{n}: {err}", pin.line()),
            }
        })
        .context("watching line")?;

    for _ in 0..10 {
        led.toggle()?;
        thread::sleep(Duration::from_millis(500));
    }

    sense.unwatch();
    led.input()?;
    gpio.close();
    println!("{} handler calls", edges.load(Ordering::Relaxed));
    Ok(())
}
