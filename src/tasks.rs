// src/tasks.rs

//! Built-in task library.
//!
//! A small set of pure-ish demo functions: seeded data generation, word
//! counting, monte-carlo pi estimation, sleeping, and failure injection
//! for exercising the retry machinery. All of them run on worker threads
//! or in worker processes, so they use only plain blocking code.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, OnceLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::registry::FunctionRegistry;
use crate::value::Value;

pub fn register_builtins(registry: &mut FunctionRegistry) {
    registry.register("data.gen_numbers", gen_numbers);
    registry.register("data.chunk", chunk);
    registry.register("data.get_item", get_item);
    registry.register("math.sum", sum_numbers);
    registry.register("text.split_words", split_words);
    registry.register("text.count_words", count_words);
    registry.register("text.merge_counts", merge_counts);
    registry.register("mc.random_points", random_points);
    registry.register("mc.count_inside_unit_circle", count_inside_unit_circle);
    registry.register("mc.estimate_pi", estimate_pi);
    registry.register("time.sleep_ms", sleep_ms);
    registry.register("test.fail_n_times", fail_n_times);
}

// -- argument extraction helpers ------------------------------------------

fn arg<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<&'a Value, String> {
    args.get(idx)
        .ok_or_else(|| format!("missing argument {idx} ({name})"))
}

fn int_arg(args: &[Value], idx: usize, name: &str) -> Result<i64, String> {
    match arg(args, idx, name)? {
        Value::Int(n) => Ok(*n),
        other => Err(format!("argument {idx} ({name}) must be an integer, got {other:?}")),
    }
}

fn str_arg<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<&'a str, String> {
    match arg(args, idx, name)? {
        Value::Str(s) => Ok(s.as_str()),
        other => Err(format!("argument {idx} ({name}) must be a string, got {other:?}")),
    }
}

fn seq_arg<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<&'a [Value], String> {
    match arg(args, idx, name)? {
        Value::Seq(items) => Ok(items.as_slice()),
        other => Err(format!("argument {idx} ({name}) must be a sequence, got {other:?}")),
    }
}

fn number(v: &Value) -> Result<f64, String> {
    match v {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(f) => Ok(*f),
        other => Err(format!("expected a number, got {other:?}")),
    }
}

fn optional_seed(args: &[Value], idx: usize) -> Result<Option<u64>, String> {
    match args.get(idx) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Int(n)) => Ok(Some(*n as u64)),
        Some(other) => Err(format!("seed must be an integer, got {other:?}")),
    }
}

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

// -- data -----------------------------------------------------------------

fn gen_numbers(args: &[Value]) -> Result<Value, String> {
    let n = int_arg(args, 0, "n")?;
    if n < 0 {
        return Err("n must be >= 0".to_string());
    }
    let mut rng = rng_for(optional_seed(args, 1)?);
    let nums = (0..n).map(|_| Value::Float(rng.gen::<f64>())).collect();
    Ok(Value::Seq(nums))
}

fn chunk(args: &[Value]) -> Result<Value, String> {
    let items = seq_arg(args, 0, "items")?;
    let size = int_arg(args, 1, "chunk_size")?;
    if size <= 0 {
        return Err("chunk_size must be > 0".to_string());
    }
    let chunks = items
        .chunks(size as usize)
        .map(|c| Value::Seq(c.to_vec()))
        .collect();
    Ok(Value::Seq(chunks))
}

fn get_item(args: &[Value]) -> Result<Value, String> {
    let items = seq_arg(args, 0, "items")?;
    let index = int_arg(args, 1, "index")?;
    items
        .get(usize::try_from(index).map_err(|_| "index must be >= 0".to_string())?)
        .cloned()
        .ok_or_else(|| format!("index {index} out of bounds (len {})", items.len()))
}

// -- math -----------------------------------------------------------------

fn sum_numbers(args: &[Value]) -> Result<Value, String> {
    let nums = seq_arg(args, 0, "nums")?;
    let mut total = 0.0;
    for v in nums {
        total += number(v)?;
    }
    Ok(Value::Float(total))
}

// -- text -----------------------------------------------------------------

fn split_words(args: &[Value]) -> Result<Value, String> {
    let text = str_arg(args, 0, "text")?;
    let words = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| Value::Str(w.to_string()))
        .collect();
    Ok(Value::Seq(words))
}

fn count_words(args: &[Value]) -> Result<Value, String> {
    let words = seq_arg(args, 0, "words")?;
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for w in words {
        let Value::Str(word) = w else {
            return Err(format!("expected a sequence of strings, got {w:?}"));
        };
        *counts.entry(word.clone()).or_insert(0) += 1;
    }
    Ok(Value::Map(
        counts.into_iter().map(|(k, v)| (k, Value::Int(v))).collect(),
    ))
}

fn merge_counts(args: &[Value]) -> Result<Value, String> {
    let maps = seq_arg(args, 0, "counts")?;
    let mut merged: BTreeMap<String, i64> = BTreeMap::new();
    for m in maps {
        let Value::Map(counts) = m else {
            return Err(format!("expected a sequence of count maps, got {m:?}"));
        };
        for (word, count) in counts {
            let Value::Int(n) = count else {
                return Err(format!("count for '{word}' must be an integer"));
            };
            *merged.entry(word.clone()).or_insert(0) += n;
        }
    }
    Ok(Value::Map(
        merged.into_iter().map(|(k, v)| (k, Value::Int(v))).collect(),
    ))
}

// -- monte-carlo pi -------------------------------------------------------

fn random_points(args: &[Value]) -> Result<Value, String> {
    let n = int_arg(args, 0, "n")?;
    if n < 0 {
        return Err("n must be >= 0".to_string());
    }
    let mut rng = rng_for(optional_seed(args, 1)?);
    let points = (0..n)
        .map(|_| {
            Value::Seq(vec![
                Value::Float(rng.gen::<f64>()),
                Value::Float(rng.gen::<f64>()),
            ])
        })
        .collect();
    Ok(Value::Seq(points))
}

fn count_inside_unit_circle(args: &[Value]) -> Result<Value, String> {
    let points = seq_arg(args, 0, "points")?;
    let mut inside = 0i64;
    for p in points {
        let Value::Seq(xy) = p else {
            return Err(format!("expected [x, y] pairs, got {p:?}"));
        };
        let [x, y] = xy.as_slice() else {
            return Err(format!("expected [x, y] pairs, got {p:?}"));
        };
        let (x, y) = (number(x)?, number(y)?);
        if x * x + y * y <= 1.0 {
            inside += 1;
        }
    }
    Ok(Value::Int(inside))
}

fn estimate_pi(args: &[Value]) -> Result<Value, String> {
    let inside = int_arg(args, 0, "inside")?;
    let total = int_arg(args, 1, "total")?;
    if total <= 0 {
        return Err("total must be > 0".to_string());
    }
    Ok(Value::Float(4.0 * inside as f64 / total as f64))
}

// -- misc -----------------------------------------------------------------

fn sleep_ms(args: &[Value]) -> Result<Value, String> {
    let ms = int_arg(args, 0, "ms")?;
    if ms < 0 {
        return Err("ms must be >= 0".to_string());
    }
    std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    Ok(Value::Null)
}

/// Fail the first `n` calls for a given key, then succeed.
///
/// The counter is in-process, so this behaves as intended with the
/// shared (thread) pool; isolated workers each see a fresh process and
/// keep failing, which is itself useful for exercising retry exhaustion.
fn fail_n_times(args: &[Value]) -> Result<Value, String> {
    static CALLS: OnceLock<Mutex<HashMap<String, i64>>> = OnceLock::new();

    let key = str_arg(args, 0, "key")?;
    let n = int_arg(args, 1, "n")?;

    let mut calls = CALLS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .map_err(|_| "failure counter poisoned".to_string())?;
    let seen = calls.entry(key.to_string()).or_insert(0);
    *seen += 1;
    if *seen <= n {
        return Err(format!("injected failure {seen}/{n} for '{key}'"));
    }
    Ok(Value::Int(*seen))
}
