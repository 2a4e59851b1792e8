use clap::ValueEnum;
use std::fmt;
use tracing::{error, info};

use crate::error::ProbeError;
use crate::gemini::types::Part;
use crate::probe::client::ApiProbe;

/// A single API capability under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Models,
    Generate,
    Stream,
    Tokens,
    Image,
}

impl Check {
    pub const ALL: [Check; 5] = [
        Check::Models,
        Check::Generate,
        Check::Stream,
        Check::Tokens,
        Check::Image,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Self::Models => "List models",
            Self::Generate => "Generate content",
            Self::Stream => "Stream generate content",
            Self::Tokens => "Count tokens",
            Self::Image => "Generate content with image",
        }
    }
}

/// What the `--test` flag selects: one check or every check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Selection {
    Models,
    Generate,
    Stream,
    Tokens,
    Image,
    All,
}

impl Selection {
    pub fn checks(&self) -> Vec<Check> {
        match self {
            Self::Models => vec![Check::Models],
            Self::Generate => vec![Check::Generate],
            Self::Stream => vec![Check::Stream],
            Self::Tokens => vec![Check::Tokens],
            Self::Image => vec![Check::Image],
            Self::All => Check::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckStatus {
    Passed,
    Failed(String),
}

impl CheckStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Per-run inputs that are not part of the probe configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub model: String,
    pub image: Option<Part>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub results: Vec<(Check, CheckStatus)>,
}

impl RunSummary {
    pub fn record(&mut self, check: Check, status: CheckStatus) {
        self.results.push((check, status));
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|(_, s)| s.is_passed()).count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn all_passed(&self) -> bool {
        self.passed() == self.total()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("\n{}\nTest summary\n{}\n", "=".repeat(60), "=".repeat(60)));
        for (check, status) in &self.results {
            let mark = if status.is_passed() { "PASS" } else { "FAIL" };
            out.push_str(&format!("[{}] {}: {}\n", mark, check.title(), status));
        }
        out.push_str(&format!(
            "\nOverall: {}/{} checks passed\n",
            self.passed(),
            self.total()
        ));
        if self.all_passed() {
            out.push_str("All checks passed.\n");
        } else {
            out.push_str("Some checks failed; check the server configuration and network.\n");
        }
        out
    }
}

/// Run one check. Never fails: any error becomes `CheckStatus::Failed`.
pub async fn run_check(probe: &ApiProbe, check: Check, options: &RunOptions) -> CheckStatus {
    println!("\n{}\n{}\n{}", "=".repeat(50), check.title(), "=".repeat(50));

    let model = options.model.as_str();
    let outcome = match check {
        Check::Models => probe.list_models().await.map(|_| ()),
        Check::Generate => probe.generate_content(model).await.map(|_| ()),
        Check::Stream => probe.stream_generate_content(model).await.map(|_| ()),
        Check::Tokens => probe.count_tokens(model).await.map(|_| ()),
        Check::Image => probe
            .generate_with_image(model, options.image.clone())
            .await
            .map(|_| ()),
    };

    match outcome {
        Ok(()) => CheckStatus::Passed,
        Err(e) => {
            error!("{} failed: {}", check.title(), e);
            CheckStatus::Failed(failure_reason(&e))
        }
    }
}

fn failure_reason(err: &ProbeError) -> String {
    match err {
        ProbeError::AllCandidatesFailed { attempts } if !attempts.is_empty() => {
            let detail: Vec<String> = attempts
                .iter()
                .map(|a| format!("{} -> {}", a.path, a.error))
                .collect();
            format!("{} ({})", err, detail.join("; "))
        }
        other => other.to_string(),
    }
}

/// Run the selected checks in order. The summary table is printed only when
/// more than one check ran.
pub async fn run(probe: &ApiProbe, selection: Selection, options: &RunOptions) -> RunSummary {
    let checks = selection.checks();
    if checks.len() > 1 {
        println!("Starting API checks");
        println!("Target server: {}", probe.config().base_url());
        println!(
            "API key: {}",
            probe.config().api_key().map_or("not set", |_| "set")
        );
    }

    let mut summary = RunSummary::default();
    for check in checks {
        let status = run_check(probe, check, options).await;
        info!("{}: {}", check.title(), status);
        summary.record(check, status);
    }

    if summary.total() > 1 {
        print!("{}", summary.render());
    }
    summary
}
