use availscope_core::presets;

pub fn run() {
    let profiles = presets();
    println!("{} built-in metric profile(s):\n", profiles.len());
    println!(
        "  {:<22} {:<44} {:<8} {:>6}  {:<10} {:>6}",
        "Name", "Metric", "Stat", "Period", "Down when", "Chunk"
    );
    for p in &profiles {
        println!(
            "  {:<22} {:<44} {:<8} {:>5}s  {:<10} {:>5}d",
            p.name,
            format!("{}/{}", p.metric.namespace, p.metric.name),
            p.statistic.api_name(),
            p.period_secs,
            p.rule.to_string(),
            p.max_chunk_span_secs / 86_400,
        );
    }
    println!("\nCustom profiles can be given inline in a batch plan.");
}
