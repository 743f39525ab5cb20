use std::fmt::Write;
use std::fs;
use std::path::Path;

/// Name of the generated playlist file. The leading `!` sorts it ahead of the
/// track files in directory listings.
pub const PLAYLIST_FILE: &str = "!Playlist.pls";

/// Regenerates the playlist from the directory's current contents.
///
/// Every `.mp3` entry is referenced by relative name in lexicographic order;
/// nothing is merged from a previous playlist. Returns the entry count.
pub fn write_playlist(dir: &Path) -> anyhow::Result<usize> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_media = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("mp3"))
            .unwrap_or(false);
        if !is_media {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            names.push(name.to_string());
        }
    }
    names.sort();

    let mut contents = String::from("[playlist]\n");
    for (index, name) in names.iter().enumerate() {
        writeln!(contents, "File{}={}", index + 1, name)?;
    }
    writeln!(contents, "NumberOfEntries={}", names.len())?;
    writeln!(contents, "Version=2")?;
    fs::write(dir.join(PLAYLIST_FILE), contents)?;

    Ok(names.len())
}
