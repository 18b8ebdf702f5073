//! Picks today's backup out of a remote directory listing.

/// Where the console drops its automatic backups.
pub const DEFAULT_REMOTE_DIR: &str = "/data/unifi/data/backup/autobackup";

/// Select the backup for `today` (`YYYYMMDD`) from a listing.
///
/// Only names containing the date are candidates. When several match the
/// lexicographically greatest wins, which for timestamp-suffixed names is
/// also the most recent one. `None` means nothing was produced today.
pub fn select_backup<'a, I>(listing: I, today: &str) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    listing
        .into_iter()
        .filter(|name| name.contains(today))
        .max()
        .map(str::to_string)
}
