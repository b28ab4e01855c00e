use mime_guess::mime;

/// Detect a MIME type from a file name's extension.
///
/// Unknown extensions, dotfiles without one and directories get nothing.
/// Text types are stored as UTF-8.
pub fn from_name(name: &str) -> Option<String> {
    let guess = mime_guess::from_path(name).first()?;
    Some(match guess.type_() == mime::TEXT && guess.get_param(mime::CHARSET).is_none() {
        true => format!("{guess}; charset=utf-8"),
        false => guess.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("report.txt", Some("text/plain; charset=utf-8"))]
    #[case("REPORT.TXT", Some("text/plain; charset=utf-8"))]
    #[case("2024.01.02_03-04-05.zip", Some("application/zip"))]
    #[case("data.json", Some("application/json"))]
    #[case("photo.png", Some("image/png"))]
    #[case("movie.mov", Some("video/quicktime"))]
    #[case("book.epub", Some("application/epub+zip"))]
    #[case(".zip", None)]
    #[case("Makefile", None)]
    #[case("data.unknown", None)]
    fn test_from_name(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(from_name(name).as_deref(), expected);
    }

    #[rstest]
    #[case("script.py")]
    #[case("archive.7z")]
    #[case("song.flac")]
    #[case("archive.tar.gz")]
    #[case("notes.md")]
    fn test_common_extensions_are_known(#[case] name: &str) {
        assert!(from_name(name).is_some(), "{name}");
    }
}
