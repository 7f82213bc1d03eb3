use std::path::Path;

use burstcal_core::pipeline::{ProfilePlan, ProfileReport, ProfileStatus};
use burstcal_core::profile::{PipelinePolicy, ProfileStore};
use console::Style;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    ok: Style,
    warn: Style,
    error: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            ok: Style::new().green(),
            warn: Style::new().yellow(),
            error: Style::new().red().bold(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }

    fn status(&self, status: ProfileStatus) -> &Style {
        match status {
            ProfileStatus::Active => &self.ok,
            ProfileStatus::Inactive => &self.disabled,
            ProfileStatus::Invalid | ProfileStatus::Aborted => &self.error,
        }
    }
}

fn print_title(s: &Styles, title: &str) {
    println!();
    println!("  {}", s.title.apply_to(title));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(title.chars().count())));
    println!();
}

pub fn print_check_summary(store: &ProfileStore) {
    let s = Styles::new();
    print_title(&s, "Burstcal Profiles");

    for profile in store.profiles() {
        if profile.is_active() {
            println!(
                "  {:<16}{}",
                s.header.apply_to(&profile.name),
                s.ok.apply_to("active")
            );
            println!(
                "    {:<12}{}",
                s.label.apply_to("Data"),
                s.path.apply_to(profile.data_base.join(&profile.data_pattern).display())
            );
            println!(
                "    {:<12}{}",
                s.label.apply_to("Work"),
                s.path.apply_to(profile.work_base.display())
            );
            println!(
                "    {:<12}{}",
                s.label.apply_to("Burst"),
                s.value.apply_to(format!("{} frames", profile.burst_number))
            );
        } else {
            println!(
                "  {:<16}{} {}",
                s.header.apply_to(&profile.name),
                s.disabled.apply_to("inactive"),
                s.label.apply_to(format!("(empty: {})", profile.empty_fields().join(", ")))
            );
        }
    }
    for rejected in store.rejected() {
        println!(
            "  {:<16}{} {}",
            s.header.apply_to(&rejected.profile),
            s.error.apply_to("invalid"),
            s.label.apply_to(format!("{}: {}", rejected.field, rejected.reason))
        );
    }
    println!();
    println!(
        "  {:<14}{}",
        s.label.apply_to("Launcher"),
        s.value.apply_to(format!(
            "{} -np {} {}",
            store.env.mpirun, store.env.nproc, store.env.kisip_exe
        ))
    );
    println!();
}

pub fn print_plan(plan: &ProfilePlan) {
    let s = Styles::new();
    print_title(&s, &format!("Plan for {}", plan.name));

    println!(
        "  {:<14}{}",
        s.label.apply_to("Data frames"),
        s.value.apply_to(plan.data_frames)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Bursts"),
        s.value.apply_to(plan.plan.bursts.len())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Batches"),
        s.value.apply_to(plan.plan.batches().len())
    );
    if plan.plan.skipped_frames > 0 {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Skipped"),
            s.warn.apply_to(format!("{} trailing frames", plan.plan.skipped_frames))
        );
    }
    println!();

    for burst in &plan.plan.bursts {
        println!("    {}", s.path.apply_to(burst.path.display()));
    }
    for failure in &plan.plan.failures {
        println!(
            "    {} {}",
            s.error.apply_to(format!("{:02}.{:03}", failure.batch, failure.index)),
            failure.error
        );
    }
    println!();
}

pub fn print_run_header(config: &Path, policy: &PipelinePolicy) {
    let s = Styles::new();
    print_title(&s, "Burstcal Pipeline");

    println!(
        "  {:<14}{}",
        s.label.apply_to("Config"),
        s.path.apply_to(config.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Jobs"),
        s.value.apply_to(policy.max_concurrent_jobs)
    );
    let retries = if policy.max_retries == 0 {
        s.disabled.apply_to("none".to_string())
    } else {
        s.value.apply_to(policy.max_retries.to_string())
    };
    println!("  {:<14}{}", s.label.apply_to("Retries"), retries);
    println!();
}

pub fn print_run_summary(reports: &[ProfileReport]) {
    let s = Styles::new();
    print_title(&s, "Summary");

    for report in reports {
        println!(
            "  {:<16}{}",
            s.header.apply_to(&report.name),
            s.status(report.status).apply_to(report.status)
        );
        if report.status == ProfileStatus::Active {
            println!(
                "    {:<14}{}",
                s.label.apply_to("Succeeded"),
                s.ok.apply_to(report.succeeded)
            );
            let failed = if report.failed > 0 { &s.error } else { &s.value };
            println!(
                "    {:<14}{}",
                s.label.apply_to("Failed"),
                failed.apply_to(report.failed)
            );
            if report.skipped_bursts > 0 {
                println!(
                    "    {:<14}{}",
                    s.label.apply_to("Skipped"),
                    s.warn.apply_to(format!("{} bursts", report.skipped_bursts))
                );
            }
            if report.skipped_frames > 0 {
                println!(
                    "    {:<14}{}",
                    s.label.apply_to("Leftover"),
                    s.warn.apply_to(format!("{} frames", report.skipped_frames))
                );
            }
            if report.cancelled > 0 {
                println!(
                    "    {:<14}{}",
                    s.label.apply_to("Cancelled"),
                    s.warn.apply_to(report.cancelled)
                );
            }
        }
        for failure in &report.failures {
            println!("    {}", s.error.apply_to(failure));
        }
    }
    println!();
}
