//! Command-line interface for the scheduling engine.
//!
//! Provides an interactive menu for setting up a provider schedule, viewing
//! availability, booking and managing appointments against the in-memory
//! stores.

use anyhow::Context;
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc,
    Weekday,
};
use dotenv::dotenv;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::info;

use wellslot::outbox::{LoggingNotifier, LoggingPublisher};
use wellslot::{
    telemetry, Appointment, AppointmentScheduler, AppointmentStatus, BookingRequest, Config,
    DaySchedule, InMemoryAppointmentRepository, InMemoryProviderRepository, Outbox, OutboxWorker,
    Provider, ProviderAvailability, SchedulingError, TimeRange,
};

const WORKING_DAYS: [Weekday; 5] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

struct SchedulingCLI {
    scheduler: AppointmentScheduler,
    providers: Arc<InMemoryProviderRepository>,
    appointments: Arc<InMemoryAppointmentRepository>,
    provider: Option<Provider>,
    running: bool,
}

impl SchedulingCLI {
    fn new(
        scheduler: AppointmentScheduler,
        providers: Arc<InMemoryProviderRepository>,
        appointments: Arc<InMemoryAppointmentRepository>,
    ) -> Self {
        SchedulingCLI {
            scheduler,
            providers,
            appointments,
            provider: None,
            running: true,
        }
    }

    fn print_header(&self) {
        println!("\n{}", "=".repeat(60));
        println!("       WELLNESS SESSION SCHEDULER");
        println!("{}", "=".repeat(60));
    }

    fn print_menu(&self) {
        println!("\n--- Main Menu ---");
        println!("1. Setup provider schedule");
        println!("2. View available slots");
        println!("3. Book appointment");
        println!("4. View appointments");
        println!("5. Update appointment status");
        println!("6. Reschedule appointment");
        println!("7. Cancel appointment");
        println!("8. Run demo");
        println!("9. Exit");
        println!("{}", "-".repeat(20));
    }

    fn get_input(&self, prompt: &str, default: Option<&str>) -> String {
        if let Some(def) = default {
            print!("{} [{}]: ", prompt, def);
        } else {
            print!("{}: ", prompt);
        }
        let _ = io::stdout().flush();

        read_answer(&mut io::stdin().lock(), default)
    }

    fn get_int_input(&self, prompt: &str, default: Option<i32>) -> i32 {
        loop {
            let default_str = default.map(|d| d.to_string());
            let input = self.get_input(prompt, default_str.as_deref());

            if let Ok(value) = input.parse::<i32>() {
                return value;
            }
            println!("Please enter a valid number");
        }
    }

    fn get_date_input(&self, prompt: &str, default: NaiveDate) -> NaiveDate {
        loop {
            let default_str = default.format("%Y-%m-%d").to_string();
            let input = self.get_input(prompt, Some(&default_str));
            match NaiveDate::parse_from_str(&input, "%Y-%m-%d") {
                Ok(date) => return date,
                Err(_) => println!("Please enter a date as YYYY-MM-DD"),
            }
        }
    }

    fn get_time_input(&self, prompt: &str, default: &str) -> NaiveTime {
        loop {
            let input = self.get_input(prompt, Some(default));
            match NaiveTime::parse_from_str(&input, "%H:%M") {
                Ok(time) => return time,
                Err(_) => println!("Please enter a time as HH:MM"),
            }
        }
    }

    fn offset(&self) -> FixedOffset {
        self.provider
            .as_ref()
            .and_then(|provider| provider.offset().ok())
            .unwrap_or_else(|| Utc.fix())
    }

    fn local(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.offset())
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }

    fn to_instant(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.offset()
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn next_working_day(&self) -> NaiveDate {
        let mut date = Utc::now().with_timezone(&self.offset()).date_naive() + Duration::days(1);
        while !WORKING_DAYS.contains(&date.weekday()) {
            date += Duration::days(1);
        }
        date
    }

    fn report(&self, err: &SchedulingError) {
        println!("\n{}", err.user_message());
        println!("  ({})", err);
    }

    fn require_provider(&self) -> Option<String> {
        match &self.provider {
            Some(provider) => Some(provider.id.clone()),
            None => {
                println!("\nPlease setup a provider schedule first (option 1)");
                None
            }
        }
    }

    async fn setup_provider(&mut self) {
        println!("\n--- Setup Provider Schedule ---");

        let name = self.get_input("Provider name", Some("Dr. Rivera"));
        let offset_minutes = self.get_int_input("UTC offset (minutes east)", Some(0));
        let start_hour = self.get_int_input("Working hours start", Some(9)) as u32;
        let end_hour = self.get_int_input("Working hours end", Some(17)) as u32;
        let include_break = self.get_input("Include lunch break? (y/n)", Some("y"));

        let ranges = if include_break.to_lowercase() == "y" && start_hour < 12 && end_hour > 13 {
            println!("Lunch break: 12:00 - 13:00");
            vec![
                TimeRange::from_hm((start_hour, 0), (12, 0)),
                TimeRange::from_hm((13, 0), (end_hour, 0)),
            ]
        } else {
            vec![TimeRange::from_hm((start_hour, 0), (end_hour, 0))]
        };

        let ranges = match ranges.into_iter().collect::<Result<Vec<_>, _>>() {
            Ok(ranges) => ranges,
            Err(e) => {
                println!("Error creating schedule: {}", e);
                return;
            }
        };

        let schedule = WORKING_DAYS
            .iter()
            .map(|day| DaySchedule::active(*day, ranges.clone()))
            .collect();

        let provider = ProviderAvailability::new(schedule).and_then(|availability| {
            let id = format!("prov-{}", &uuid::Uuid::new_v4().to_string()[..8]);
            Provider::new(id, name.clone(), offset_minutes, availability)
        });

        match provider {
            Ok(provider) => {
                self.providers.upsert(provider.clone()).await;
                println!("\nSchedule created for {} ({})", name, provider.id);
                println!("Working days: Monday - Friday");
                self.provider = Some(provider);
            }
            Err(e) => println!("Error creating provider: {}", e),
        }
    }

    async fn view_available_slots(&self) {
        let provider_id = match self.require_provider() {
            Some(id) => id,
            None => return,
        };

        println!("\n--- Available Slots ---");
        let date = self.get_date_input("Date", self.next_working_day());
        let duration = self.get_int_input("Session length (minutes)", Some(60));

        match self
            .scheduler
            .get_availability(&provider_id, date, Some(duration.max(0) as u32))
            .await
        {
            Ok(slots) if slots.is_empty() => println!("\nNo available slots on {}", date),
            Ok(slots) => {
                println!("\n{}:", date.format("%A, %Y-%m-%d"));
                for slot in slots {
                    println!(
                        "  {} - {}",
                        slot.start.with_timezone(&self.offset()).format("%H:%M"),
                        slot.end.with_timezone(&self.offset()).format("%H:%M")
                    );
                }
            }
            Err(e) => self.report(&e),
        }
    }

    async fn book(&self) {
        let provider_id = match self.require_provider() {
            Some(id) => id,
            None => return,
        };

        println!("\n--- Book Appointment ---");
        let client_id = self.get_input("Client ID", Some("client-1"));
        let date = self.get_date_input("Date", self.next_working_day());
        let time = self.get_time_input("Start time", "10:00");
        let duration = self.get_int_input("Session length (minutes)", Some(60));
        let amount = self.get_int_input("Price (cents)", Some(0));
        let notes = self.get_input("Notes", Some(""));

        let start = match self.to_instant(date, time) {
            Some(start) => start,
            None => {
                println!("\nInvalid local time");
                return;
            }
        };

        let mut request = BookingRequest::new(provider_id, client_id, start)
            .with_duration(duration.max(0) as u32)
            .with_amount(amount.max(0) as u64);
        if !notes.is_empty() {
            request = request.with_notes(notes);
        }

        match self.scheduler.book_appointment(request).await {
            Ok(id) => {
                println!("\nAppointment requested for {}", self.local(start));
                println!("  ID: {}...", &id.to_string()[..8]);
            }
            Err(e) => self.report(&e),
        }
    }

    async fn list_appointments(&self) -> Vec<Appointment> {
        match &self.provider {
            Some(provider) => self.appointments.list_by_provider(&provider.id).await,
            None => Vec::new(),
        }
    }

    async fn view_appointments(&self) {
        if self.require_provider().is_none() {
            return;
        }

        let appointments = self.list_appointments().await;
        if appointments.is_empty() {
            println!("\nNo appointments");
            return;
        }

        println!("\n--- Appointments ({}) ---", appointments.len());
        for apt in &appointments {
            println!(
                "  {} ({} min) - {} [{}]",
                self.local(apt.date_time),
                apt.duration_minutes,
                apt.client_id,
                apt.status
            );
            if let Some(link) = &apt.meeting_link {
                println!("    Link: {}", link);
            }
            if let Some(notes) = &apt.notes {
                println!("    Notes: {}", notes.replace('\n', " "));
            }
        }
    }

    async fn select_appointment(&self, action: &str) -> Option<Appointment> {
        self.require_provider()?;

        let appointments = self.list_appointments().await;
        if appointments.is_empty() {
            println!("\nNo appointments to {}", action);
            return None;
        }

        println!("\nCurrent appointments:");
        for (i, apt) in appointments.iter().enumerate() {
            println!(
                "  {}. {} - {} [{}]",
                i + 1,
                apt.client_id,
                self.local(apt.date_time),
                apt.status
            );
        }

        let prompt = format!("Select appointment to {} (0 to go back)", action);
        let choice = self.get_int_input(&prompt, Some(0));
        if choice > 0 && (choice as usize) <= appointments.len() {
            Some(appointments[choice as usize - 1].clone())
        } else {
            None
        }
    }

    async fn update_status(&self) {
        println!("\n--- Update Status ---");
        let apt = match self.select_appointment("update").await {
            Some(apt) => apt,
            None => return,
        };

        let status = self.get_input(
            "New status (confirmed/rejected/paid/completed)",
            Some("confirmed"),
        );
        match self.scheduler.update_status_str(apt.id, &status).await {
            Ok(()) => println!("\nStatus updated"),
            Err(e) => self.report(&e),
        }

        let link = self.get_input("Meeting link (blank to skip)", Some(""));
        if !link.is_empty() {
            match self.scheduler.update_meeting_link(apt.id, &link).await {
                Ok(()) => println!("Meeting link saved"),
                Err(e) => self.report(&e),
            }
        }
    }

    async fn reschedule(&self) {
        println!("\n--- Reschedule Appointment ---");
        let apt = match self.select_appointment("reschedule").await {
            Some(apt) => apt,
            None => return,
        };

        let current_date = apt.date_time.with_timezone(&self.offset()).date_naive();
        let date = self.get_date_input("New date", current_date);
        let time = self.get_time_input("New start time", "11:00");
        let start = match self.to_instant(date, time) {
            Some(start) => start,
            None => {
                println!("\nInvalid local time");
                return;
            }
        };

        match self.scheduler.reschedule_appointment(apt.id, start).await {
            Ok(()) => println!(
                "\nRescheduled to {}, awaiting confirmation",
                self.local(start)
            ),
            Err(e) => self.report(&e),
        }
    }

    async fn cancel(&self) {
        println!("\n--- Cancel Appointment ---");
        let apt = match self.select_appointment("cancel").await {
            Some(apt) => apt,
            None => return,
        };

        let reason = self.get_input("Reason", Some("Cancelled by request"));
        match self.scheduler.cancel_appointment(apt.id, &reason).await {
            Ok(()) => {
                println!("\nAppointment for {} cancelled", apt.client_id);
                println!("Time slot is now available again");
            }
            Err(e) => self.report(&e),
        }
    }

    async fn run_demo(&mut self) {
        println!("\n--- Running Demo ---");

        let morning = TimeRange::from_hm((9, 0), (12, 0));
        let afternoon = TimeRange::from_hm((13, 0), (17, 0));
        let provider = match (morning, afternoon) {
            (Ok(morning), Ok(afternoon)) => {
                let schedule = WORKING_DAYS
                    .iter()
                    .map(|day| DaySchedule::active(*day, vec![morning, afternoon]))
                    .collect();
                ProviderAvailability::new(schedule).and_then(|availability| {
                    Provider::new("demo-provider", "Dr. Demo", 0, availability)
                })
            }
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        let provider = match provider {
            Ok(provider) => provider,
            Err(e) => {
                println!("Error creating demo provider: {}", e);
                return;
            }
        };
        self.providers.upsert(provider.clone()).await;
        self.provider = Some(provider);

        let date = self.next_working_day();
        let slots = match self
            .scheduler
            .get_availability("demo-provider", date, None)
            .await
        {
            Ok(slots) => slots,
            Err(e) => {
                self.report(&e);
                return;
            }
        };
        println!("Dr. Demo has {} open slots on {}", slots.len(), date);

        let ten = match NaiveTime::from_hms_opt(10, 0, 0).and_then(|t| self.to_instant(date, t)) {
            Some(ten) => ten,
            None => return,
        };

        println!("\nJohn books 10:00...");
        let john = match self
            .scheduler
            .book_appointment(
                BookingRequest::new("demo-provider", "john", ten)
                    .with_amount(6000)
                    .with_notes("Initial consultation"),
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.report(&e);
                return;
            }
        };
        println!("  booked, status PENDING");

        println!("\nJane also tries 10:00...");
        match self
            .scheduler
            .book_appointment(BookingRequest::new("demo-provider", "jane", ten))
            .await
        {
            Ok(_) => println!("  unexpectedly booked"),
            Err(e) => println!("  rejected: {}", e.user_message()),
        }

        if let Err(e) = self
            .scheduler
            .update_status(john, AppointmentStatus::Confirmed)
            .await
        {
            self.report(&e);
        }
        println!("\nProvider confirms John's session");

        if let Ok(slots) = self
            .scheduler
            .get_availability("demo-provider", date, None)
            .await
        {
            println!("Open slots now: {}", slots.len());
        }

        println!("\nJohn cancels; the 10:00 slot frees up");
        if let Err(e) = self.scheduler.cancel_appointment(john, "Feeling better").await {
            self.report(&e);
        }
        match self
            .scheduler
            .book_appointment(BookingRequest::new("demo-provider", "jane", ten))
            .await
        {
            Ok(_) => println!("  Jane books 10:00 successfully"),
            Err(e) => self.report(&e),
        }

        info!("Demo finished");
    }

    async fn run(&mut self) {
        self.print_header();

        while self.running {
            self.print_menu();

            let choice = self.get_int_input("Enter choice", Some(8));

            match choice {
                1 => self.setup_provider().await,
                2 => self.view_available_slots().await,
                3 => self.book().await,
                4 => self.view_appointments().await,
                5 => self.update_status().await,
                6 => self.reschedule().await,
                7 => self.cancel().await,
                8 => self.run_demo().await,
                9 => {
                    self.running = false;
                    println!("\nGoodbye!");
                }
                _ => println!("Invalid choice"),
            }
        }
    }
}

/// Read one trimmed line, falling back to `default` on blank input or EOF.
///
/// Runs under `block_in_place` so the outbox worker keeps running on
/// another thread while the terminal waits.
fn read_answer(reader: &mut impl BufRead, default: Option<&str>) -> String {
    let mut input = String::new();
    let read = tokio::task::block_in_place(|| reader.read_line(&mut input));
    match (read, input.trim()) {
        (Ok(n), answer) if n > 0 && !answer.is_empty() => answer.to_string(),
        _ => default.unwrap_or("").to_string(),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    telemetry::init_tracing(&config.log_filter)?;

    let providers = Arc::new(InMemoryProviderRepository::new());
    let appointments = Arc::new(InMemoryAppointmentRepository::new());

    let (outbox, rx) = Outbox::channel();
    let worker = OutboxWorker::new(
        rx,
        Arc::new(LoggingNotifier),
        Arc::new(LoggingPublisher),
        config.events_channel.clone(),
    );
    let worker_handle = tokio::spawn(worker.run());

    let scheduler = AppointmentScheduler::new(providers.clone(), appointments.clone(), outbox)
        .with_config(config.scheduler.clone());

    let mut cli = SchedulingCLI::new(scheduler, providers, appointments);
    cli.run().await;

    // Dropping the scheduler closes the outbox so the worker can finish.
    drop(cli);
    worker_handle.await.context("Outbox worker failed")?;

    Ok(())
}
