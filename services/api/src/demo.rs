use crate::infra::{
    seed_demo_roster, InMemoryFileStorage, InMemoryIdentityProvider, DEMO_ADMIN, DEMO_BONUS,
    DEMO_MENTEE, DEMO_PAIRING, DEMO_SECOND_MENTOR, DEMO_SECOND_PAIRING,
};
use chrono::{Datelike, Utc};
use clap::Args;
use mentorship_ledger::config::ProgramConfig;
use mentorship_ledger::error::AppError;
use mentorship_ledger::program::domain::{
    AuditLogEntry, BonusActivityId, ImageLocator, PairingId, UserId,
};
use mentorship_ledger::program::{
    AuditSubject, MemoryDocumentStore, MentorshipProgram, NewSubmission, PhotoUpload,
    ProgramError,
};
use mime_guess::mime::{self, Mime};
use std::path::PathBuf;
use std::sync::Arc;

/// Smallest byte sequence recognisable as a JPEG.
const SAMPLE_JPEG: &[u8] = &[
    0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10, 0x4a, 0x46, 0x49, 0x46, 0xff, 0xd9,
];

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Photo to upload for the first submission; the content type is guessed from the extension.
    #[arg(long)]
    pub(crate) photo: Option<PathBuf>,
    /// ISO week number for the demo submissions (defaults to the current week).
    #[arg(long)]
    pub(crate) week: Option<u32>,
    /// Base points per submission (defaults to the configured program value).
    #[arg(long)]
    pub(crate) base_points: Option<u64>,
    /// Skip the participant deletion at the end of the demo.
    #[arg(long)]
    pub(crate) skip_cleanup: bool,
}

type DemoProgram =
    MentorshipProgram<MemoryDocumentStore, InMemoryFileStorage, InMemoryIdentityProvider>;

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let today = Utc::now().date_naive().iso_week();
    let week = args.week.unwrap_or_else(|| today.week());
    let year = today.year();

    let mut config = ProgramConfig::default();
    if let Some(base_points) = args.base_points {
        config.base_points = base_points;
    }

    let store = Arc::new(MemoryDocumentStore::new());
    let files = Arc::new(InMemoryFileStorage::default());
    let identity = Arc::new(InMemoryIdentityProvider::default());
    seed_demo_roster(&store, &identity).map_err(ProgramError::from)?;
    let program = MentorshipProgram::new(store, files.clone(), identity, config);
    let admin = UserId::from(DEMO_ADMIN);

    println!("Mentorship ledger demo");
    println!(
        "  Week {week} of {year}, {} base points per submission",
        config.base_points
    );

    let (bytes, content_type) = load_photo(args.photo)?;
    println!("\nPhoto submission ({}, {} bytes)", content_type, bytes.len());
    let submission = program.submit_photo(PhotoUpload {
        submitter_id: UserId::from(DEMO_MENTEE),
        week_number: week,
        year,
        bytes,
        content_type,
        bonus_activity_ids: vec![BonusActivityId::from(DEMO_BONUS)],
    })?;
    println!(
        "  {} stored at {} worth {} points ({} base + {} bonus)",
        submission.id,
        submission.image,
        submission.total_points,
        submission.base_points,
        submission.bonus_points
    );

    let approved = program.approve_submission(&submission.id, &admin)?;
    if let Some(change) = approved.pairing_points {
        println!(
            "  Approved: {} moved {} -> {} points",
            approved.submission.pairing_id, change.previous_points, change.new_points
        );
    }
    match program.approve_submission(&submission.id, &admin) {
        Err(err) => println!("  Second approval refused: {err}"),
        Ok(_) => println!("  Second approval unexpectedly succeeded"),
    }

    println!("\nRejected submission");
    let second = program.create_submission(NewSubmission {
        submitter_id: UserId::from(DEMO_SECOND_MENTOR),
        week_number: week,
        year,
        image: ImageLocator::from("memory://photos/external.jpg"),
        bonus_activity_ids: Vec::new(),
    })?;
    let rejected =
        program.reject_submission(&second.id, &admin, "Photo does not show both participants")?;
    println!(
        "  {} rejected: {}",
        rejected.submission.id,
        rejected.submission.review_reason.unwrap_or_default()
    );

    println!("\nManual adjustment");
    let receipt = program.adjust_points(
        &PairingId::from(DEMO_SECOND_PAIRING),
        &admin,
        3,
        "Peer shout-out at the monthly meetup",
    )?;
    println!(
        "  {} {:+} -> {} points",
        receipt.pairing_id, receipt.change.delta, receipt.change.new_points
    );

    print_standings(&program)?;

    println!("\nLedger verification");
    for pairing in [DEMO_PAIRING, DEMO_SECOND_PAIRING] {
        let verification = program.verify_ledger(&PairingId::from(pairing))?;
        println!(
            "  {}: stored {} / replayed {} over {} entries ({})",
            verification.pairing_id,
            verification.stored_total,
            verification.replayed_total,
            verification.entries,
            if verification.consistent {
                "consistent"
            } else {
                "DRIFT"
            }
        );
    }

    if args.skip_cleanup {
        return Ok(());
    }

    println!("\nParticipant deletion");
    let report = program.delete_user(&UserId::from(DEMO_MENTEE), &admin)?;
    println!(
        "  Removed {} submission(s), {} photo(s), {} pairing(s), {} application(s); updated {} family record(s)",
        report.submissions_deleted,
        report.images_deleted,
        report.pairings_deleted,
        report.applications_deleted,
        report.families_updated
    );
    println!("  Photos left in storage: {}", files.len());
    let repeat = program.delete_user(&UserId::from(DEMO_MENTEE), &admin)?;
    println!(
        "  Repeat deletion: {}",
        if repeat.is_noop() {
            "nothing left to remove"
        } else {
            "removed stragglers"
        }
    );

    println!("\nAudit trail for {DEMO_PAIRING}");
    let trail = program.audit_trail(&AuditSubject::Pairing(PairingId::from(DEMO_PAIRING)))?;
    for entry in &trail {
        println!("  {}", describe(entry));
    }

    Ok(())
}

fn load_photo(path: Option<PathBuf>) -> Result<(Vec<u8>, Mime), AppError> {
    match path {
        Some(path) => {
            let content_type = mime_guess::from_path(&path).first_or_octet_stream();
            let bytes = std::fs::read(&path)?;
            Ok((bytes, content_type))
        }
        None => Ok((SAMPLE_JPEG.to_vec(), mime::IMAGE_JPEG)),
    }
}

fn print_standings(program: &DemoProgram) -> Result<(), AppError> {
    let standings = program.standings()?;
    println!("\nStandings");
    for family in &standings.families {
        println!(
            "  #{} {} ({} points across {} pairing(s))",
            family.rank, family.name, family.total_points, family.pairings
        );
    }
    for pairing in &standings.pairings {
        println!(
            "    #{} {} mentored by {}: {} total / {} this week",
            pairing.rank,
            pairing.pairing_id,
            pairing.mentor_id,
            pairing.total_points,
            pairing.weekly_points
        );
    }
    Ok(())
}

fn describe(entry: &AuditLogEntry) -> String {
    let mut line = format!(
        "{} {} by {}",
        entry.timestamp.format("%H:%M:%S%.3f"),
        entry.action.label(),
        entry.actor_id
    );
    if let Some(points) = entry.changes.points {
        line.push_str(&format!(" ({:+} -> {})", points.delta, points.new_points));
    }
    if let Some(reason) = &entry.changes.reason {
        line.push_str(&format!(": {reason}"));
    }
    line
}
