//! Comment styles per file extension.
//!
//! Banners (`[square] bundle: ...`) and license headers have to be valid
//! comments in whatever language the buffer is written in, so every
//! extension square knows about maps to a header/body/footer template.

/// How a multi-line comment is spelled in one language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentStyle {
    pub header: &'static str,
    pub body: &'static str,
    pub footer: &'static str,
}

const C_STYLE: CommentStyle = CommentStyle {
    header: "/*!",
    body: " * ",
    footer: " */",
};

const HASH_STYLE: CommentStyle = CommentStyle {
    header: "###",
    body: "# ",
    footer: "###",
};

const JADE_STYLE: CommentStyle = CommentStyle {
    header: "//-",
    body: "//- ",
    footer: "//-",
};

/// Looks up the comment style for `extension`. Unknown extensions fall back
/// to C style comments, which covers js, css and every css pre-processor.
pub fn style(extension: &str) -> CommentStyle {
    match extension.trim_start_matches('.') {
        "coffee" => HASH_STYLE,
        "jade" | "pug" => JADE_STYLE,
        _ => C_STYLE,
    }
}

/// Whether square has an explicit entry for `extension`.
pub fn is_known(extension: &str) -> bool {
    matches!(
        extension.trim_start_matches('.'),
        "js" | "css" | "styl" | "less" | "sass" | "scss" | "coffee" | "jade" | "pug"
    )
}

impl CommentStyle {
    /// Wraps `text` into a comment block. Every line of `text` is prefixed
    /// with the body string.
    pub fn wrap(&self, text: &str) -> String {
        let mut out = String::from(self.header);
        for line in text.lines() {
            out.push('\n');
            out.push_str(self.body.trim_end());
            if !line.is_empty() {
                out.push_str(&self.body[self.body.trim_end().len()..]);
                out.push_str(line);
            }
        }
        out.push('\n');
        out.push_str(self.footer);
        out
    }

    /// Single line banner, used to mark where a bundle or dependency starts.
    pub fn banner(&self, text: &str) -> String {
        format!("{} {} {}", self.header, text, self.footer.trim_start())
    }
}

/// Shorthand for `style(extension).banner(text)`.
pub fn banner(extension: &str, text: &str) -> String {
    style(extension).banner(text)
}

/// Shorthand for `style(extension).wrap(text)`.
pub fn wrap(extension: &str, text: &str) -> String {
    style(extension).wrap(text)
}
