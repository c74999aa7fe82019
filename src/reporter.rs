use crate::types::{TrackingEpisode, WalletIdentity, WalletReport};

/// Emit one wallet report as a single JSON line to stdout.
pub fn report_wallet(report: &WalletReport) {
    if let Ok(json) = serde_json::to_string(report) {
        println!("{json}");
    }
}

/// Emit every report of a refresh cycle, one JSON line each.
pub fn report_cycle(reports: &[WalletReport]) {
    for report in reports {
        report_wallet(report);
    }
}

/// Emit the tracked wallet list as pretty-printed JSON to stdout.
pub fn report_wallets(wallets: &[WalletIdentity]) {
    if let Ok(json) = serde_json::to_string_pretty(wallets) {
        println!("{json}");
    }
}

/// Emit a (re)started tracking episode as pretty-printed JSON to stdout.
pub fn report_episode(episode: &TrackingEpisode) {
    if let Ok(json) = serde_json::to_string_pretty(episode) {
        println!("{json}");
    }
}
