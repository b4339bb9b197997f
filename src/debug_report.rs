use bidrule::{Stage, StageRun};
use serde_json::Value;

mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";

    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    pub struct Palette {
        enabled: bool,
    }

    impl Palette {
        pub fn new(enabled: bool) -> Self {
            Self { enabled }
        }

        pub fn paint(&self, s: impl AsRef<str>, code: &str) -> String {
            if self.enabled { format!("{code}{}{RESET}", s.as_ref()) } else { s.as_ref().to_string() }
        }

        pub fn bold(&self, s: impl AsRef<str>) -> String {
            self.paint(s, BOLD)
        }

        pub fn dim(&self, s: impl AsRef<str>) -> String {
            self.paint(s, DIM)
        }

        pub fn section(&self, title: &str) -> String {
            self.paint(format!("━━━ {title} ━━━"), GRAY)
        }
    }
}

pub fn print_run(stage: Stage, run: &StageRun, color: bool) {
    let palette = ansi::Palette::new(color);
    println!(
        "\n{}",
        palette.bold(palette.paint(format!("⚙  Stage {stage}: request \"{}\"", run.request.id), ansi::CYAN))
    );

    println!("\n{}", palette.section("Outcome"));
    if run.rejected {
        println!("  {}", palette.bold(palette.paint("✗ request rejected", ansi::RED)));
    } else if run.updated {
        println!("  {}", palette.paint("✓ request updated", ansi::GREEN));
    } else {
        println!("  {}", palette.dim("✗ request unaltered"));
    }

    println!("\n{}", palette.section("Audit trail"));
    print_audit_trail(run, &palette);

    println!("\n{}", palette.section("Bidders"));
    print_bidders(run, &palette);

    if !run.seat_non_bids.is_empty() {
        println!("\n{}", palette.section("Seat non-bids"));
        print_seat_non_bids(run, &palette);
    }

    println!("\n{}", palette.section("Timing"));
    println!("  Process: {}", palette.paint(format!("{:?}", run.elapsed), ansi::GREEN));
    println!();
}

fn print_audit_trail(run: &StageRun, palette: &ansi::Palette) {
    if run.audit_trail.is_empty() {
        println!("{}", palette.dim("  No activities recorded"));
        return;
    }

    for (idx, activity) in run.audit_trail.activities().iter().enumerate() {
        println!(
            "  {} {} {} {}",
            palette.paint(format!("[{idx}]"), ansi::GRAY),
            palette.bold(palette.paint(&activity.name, ansi::GREEN)),
            palette.dim("│"),
            activity.status,
        );
        for (key, value) in &activity.values {
            println!("      {} {}", palette.dim(format!("{key}:")), fmt_value(value));
        }
        if !activity.applied_to.imp_ids.is_empty() {
            println!("      {} {}", palette.dim("imps:"), palette.paint(activity.applied_to.imp_ids.join(", "), ansi::CYAN));
        }
    }
}

fn print_bidders(run: &StageRun, palette: &ansi::Palette) {
    if run.request.imp.is_empty() {
        println!("{}", palette.dim("  No impressions"));
        return;
    }

    for imp in &run.request.imp {
        let bidders = imp.bidders();
        let listed = if bidders.is_empty() { palette.dim("(none)") } else { palette.paint(bidders.join(", "), ansi::GREEN) };
        println!("  {} {}", palette.paint(format!("{}:", imp.id), ansi::CYAN), listed);
    }
}

fn print_seat_non_bids(run: &StageRun, palette: &ansi::Palette) {
    for seat in &run.seat_non_bids {
        let imps: Vec<String> = seat.non_bid.iter().map(|nb| format!("{} ({})", nb.imp_id, nb.status_code)).collect();
        println!("  {} {}", palette.paint(format!("{}:", seat.seat), ansi::RED), imps.join(", "));
    }
}

fn fmt_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}
