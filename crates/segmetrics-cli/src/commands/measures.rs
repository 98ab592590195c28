//! Measure listing command.

use segmetrics::measure::registry::{DEFAULT_MEASURES, MEASURES};

pub fn run() {
    println!("Available measures:");
    println!("{:-<60}", "");
    for info in MEASURES {
        let scope = if info.image_level { "image" } else { "object" };
        println!("  {:<8} {:<7} {}", info.name, scope, info.description);
    }

    println!();
    println!("Modifiers: ob, rev, sym, agg=<sum|mean|gmean|object-mean>, q=<quantile>, nodet=<value>");
    println!("Defaults: {}", DEFAULT_MEASURES.join(" "));
}
