use std::time::Duration;

use lpbridge_bridge::{CallOutput, MemorySnapshot, ObserverFailure, SolveReport};
use lpbridge_engine::NodeInfo;

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1_000 {
        format!("{ms}ms")
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}

fn format_bound(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.6}"),
        None => "-".to_string(),
    }
}

pub fn format_node_line(info: &NodeInfo) -> String {
    format!(
        "node {} depth {} ({:?}) best {} bound {} explored {} active {}",
        info.id,
        info.depth,
        info.reason,
        format_bound(info.incumbent),
        format_bound(info.objective),
        info.explored,
        info.active
    )
}

fn format_solution(r: &SolveReport) -> String {
    let mut line = format!(
        "{:?}: {:?} ({:?}) objective {}",
        r.method, r.status, r.code, r.objective
    );
    if let Some(nodes) = r.nodes {
        line.push_str(&format!(" after {nodes} nodes"));
    }
    for (j, value) in r.columns.iter().enumerate() {
        line.push_str(&format!("\n  x[{j}] = {value}"));
    }
    line
}

pub fn format_output(output: &CallOutput) -> String {
    match output {
        CallOutput::Solution(r) => format_solution(r),
        CallOutput::Factorization(f) => {
            format!("factorization: {:?} (factored: {})", f.code, f.factored)
        }
        CallOutput::ModelRead(m) => format!(
            "model: {} rows, {} columns, {} non-zeros ({} lines)",
            m.rows, m.columns, m.nonzeros, m.lines
        ),
    }
}

pub fn format_memory(label: &str, s: &MemorySnapshot) -> String {
    format!(
        "{label}: {} blocks ({} peak), {} ({} peak)",
        s.count,
        s.cpeak,
        format_bytes(s.total),
        format_bytes(s.tpeak)
    )
}

pub fn format_failure(f: &ObserverFailure) -> String {
    format!("warning: call {} observer failed at {:?}: {}", f.call_id, f.site, f.message)
}
