//! CLI command handlers (print to stdout)

use anyhow::{Context, Result};
use chrono::Local;
use std::sync::Arc;
use tokio::sync::watch;

use crate::api::{ApiClient, ChatApi, ServiceApi};
use crate::auth::Session;
use crate::config::Config;
use crate::models::{ChatMessage, ChatRoom, ServiceRecord};
use crate::realtime::{EventStreamClient, StompTransport};
use crate::session::services::CenterDirectory;
use crate::session::{ChatSession, LiveServices, SendPolicy, ServicesView};
use crate::tui::{self, log_capture::LogBuffer};

/// Authenticated REST client for the configured backend.
fn connect(config: &Config) -> Result<(Session, ApiClient)> {
    let session = Session::from_config(config)?;
    let client = ApiClient::new(&config.api_base_url, &session.token);
    Ok((session, client))
}

/// Room for an appointment, with a readable error while none exists.
async fn room_for(client: &ApiClient, appointment_id: &str) -> Result<Option<ChatRoom>> {
    match client.chat_room_for_appointment(appointment_id).await {
        Ok(room) => Ok(Some(room)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to load chat room for appointment {}", appointment_id))
        }
    }
}

fn print_no_room(appointment_id: &str) {
    println!(
        "No chat room for appointment {} yet. A room opens once an employee is assigned.",
        appointment_id
    );
}

/// List chat rooms the viewer takes part in.
pub async fn list_chats(config: &Config) -> Result<()> {
    let (session, client) = connect(config)?;
    let rooms = client.chat_rooms().await.context("Failed to list chat rooms")?;

    println!("\nChats:");
    println!("{:-<60}", "");

    if rooms.is_empty() {
        println!("  (no chats yet)");
        return Ok(());
    }

    for room in &rooms {
        let unread = if room.unread_count > 0 {
            format!("  ({} unread)", room.unread_count)
        } else {
            String::new()
        };
        println!("{}{}", room.title(), unread);
        println!("  With: {}", room.counterpart_name(&session.viewer.id));
        println!("  Appointment: {}", room.appointment_id);
        if let Some(preview) = room.last_message.as_deref().map(str::trim) {
            if !preview.is_empty() {
                println!("  Last: {}", preview);
            }
        }
        println!();
    }
    Ok(())
}

fn message_line(msg: &ChatMessage) -> String {
    let time = msg.sent_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let sender = if msg.is_own { "You" } else { msg.sender_name.as_str() };
    let read = if msg.is_own && msg.is_read { " (read)" } else { "" };
    format!("[{}] {}: {}{}", time, sender, msg.message, read)
}

/// Print the history of an appointment's chat.
pub async fn read_messages(config: &Config, appointment_id: &str) -> Result<()> {
    let (session, client) = connect(config)?;
    let Some(room) = room_for(&client, appointment_id).await? else {
        print_no_room(appointment_id);
        return Ok(());
    };

    let messages = client
        .messages(&room.id)
        .await
        .context("Failed to load messages")?;

    println!("{} with {}", room.title(), room.counterpart_name(&session.viewer.id));
    if messages.is_empty() {
        println!("(no messages)");
        return Ok(());
    }
    for msg in messages {
        println!("{}", message_line(&msg.for_viewer(&session.viewer.id)));
    }
    Ok(())
}

/// Send one message over REST.
pub async fn send_message(config: &Config, appointment_id: &str, text: &str) -> Result<()> {
    let text = text.trim();
    if text.is_empty() {
        anyhow::bail!("Message is empty");
    }
    let (_, client) = connect(config)?;
    let Some(room) = room_for(&client, appointment_id).await? else {
        print_no_room(appointment_id);
        return Ok(());
    };

    tracing::debug!("Sending message to room {}", room.id);
    let receipt = client
        .send_message(&room.id, text)
        .await
        .context("Failed to send message")?;
    match receipt.status.as_deref() {
        Some(status) => println!("Message sent (id {}, {}).", receipt.message_id, status),
        None => println!("Message sent (id {}).", receipt.message_id),
    }
    Ok(())
}

/// Open the live chat view for an appointment.
pub async fn open_chat(
    config: &Config,
    appointment_id: &str,
    optimistic: bool,
    log_buffer: LogBuffer,
) -> Result<()> {
    let (session, client) = connect(config)?;
    let transport = StompTransport::new(
        &config.ws_url,
        config.realtime.chat_policy(),
        config.realtime.handshake_timeout(),
    );
    let policy = if optimistic {
        SendPolicy::Optimistic
    } else {
        SendPolicy::AwaitEcho
    };
    let chat = ChatSession::new(Arc::new(client), Arc::new(transport), &session, appointment_id)
        .with_send_policy(policy);
    tui::run_chat(chat, log_buffer).await
}

fn record_lines(record: &ServiceRecord) -> Vec<String> {
    let mut lines = vec![format!(
        "{}  [{}]",
        record.vehicle_name,
        record.status.as_str()
    )];
    let mut detail = format!("  {}", record.service_type);
    if !record.license_plate.is_empty() {
        detail.push_str(&format!(" | {}", record.license_plate));
    }
    lines.push(detail);
    lines.push(format!("  ID: {}", record.id));
    lines.push(format!("  Technician: {}", record.assigned_employee));

    let mut center = format!("  Centre: {}", record.service_center);
    if let Some(slot) = &record.center_slot {
        center.push_str(&format!(" (slot {})", slot));
    }
    if let Some(loc) = &record.location {
        center.push_str(&format!(" @ {:.5},{:.5}", loc.latitude, loc.longitude));
    }
    lines.push(center);

    if let Some(start) = &record.start_date {
        lines.push(format!("  Start: {}", start));
    }
    if let Some(eta) = &record.estimated_completion {
        lines.push(format!("  Estimated completion: {}", eta));
    }
    lines
}

/// Print the viewer's services; with `watch`, follow live updates until Ctrl-C.
pub async fn list_services(config: &Config, watch: bool) -> Result<()> {
    let (session, client) = connect(config)?;

    if !watch {
        let (appointments, centers) = tokio::join!(
            client.appointments(&session.viewer.id),
            client.service_centers(),
        );
        let summaries = appointments.context("Failed to load services")?;
        let directory = centers
            .map(|centers| CenterDirectory::new(&centers))
            .unwrap_or_default();
        let records: Vec<ServiceRecord> = summaries
            .iter()
            .map(|s| directory.enrich(ServiceRecord::from_summary(s)))
            .collect();
        print_list(&records, None);
        return Ok(());
    }

    let feed = EventStreamClient::new(&client, config.realtime.event_stream_policy());
    let mut services = LiveServices::new(Arc::new(client), Arc::new(feed), &session.viewer.id);
    services.mount().await;

    let (view_tx, mut view_rx) = watch::channel(services.view());
    let mut shown = view_rx.borrow_and_update().clone();
    print_list(&shown.records, shown.error.as_deref());
    let driver = tokio::spawn(async move { services.run(view_tx).await });

    println!("Watching for updates (Ctrl-C to stop)...\n");
    loop {
        tokio::select! {
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                print_changes(&shown, &view);
                shown = view;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Dropping the receiver stops the controller.
    drop(view_rx);
    if let Err(e) = driver.await {
        tracing::warn!("Service watch task ended abnormally: {}", e);
    }
    Ok(())
}

/// Lines for what differs between two snapshots: stream state, then each
/// record whose fields changed.
fn change_lines(before: &ServicesView, after: &ServicesView) -> Vec<String> {
    let mut lines = Vec::new();
    if before.connection != after.connection {
        lines.push(format!("Update stream: {}", after.connection));
    }
    for record in &after.records {
        let previous = before.records.iter().find(|r| r.id == record.id);
        if previous != Some(record) {
            lines.push("Updated:".to_string());
            lines.extend(record_lines(record));
        }
    }
    lines
}

fn print_changes(before: &ServicesView, after: &ServicesView) {
    let lines = change_lines(before, after);
    if lines.is_empty() {
        return;
    }
    println!("[{}]", Local::now().format("%H:%M:%S"));
    for line in lines {
        println!("{}", line);
    }
    println!();
}

fn print_list(records: &[ServiceRecord], error: Option<&str>) {
    println!("\nServices:");
    println!("{:-<60}", "");

    if let Some(error) = error {
        println!("  {}", error);
        return;
    }
    if records.is_empty() {
        println!("  (no services booked)");
        return;
    }
    for record in records {
        for line in record_lines(record) {
            println!("{}", line);
        }
        println!();
    }
}
