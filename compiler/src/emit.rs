// emit.rs — Indented text sink shared by the C and HLS targets

const INDENT: &str = "    ";

#[derive(Debug, Default)]
pub struct Emitter {
    out: String,
    depth: usize,
    fresh: u32,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.depth {
                self.out.push_str(INDENT);
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    /// Emit `text` and indent everything after it one level.
    pub fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.depth += 1;
    }

    /// Dedent one level and emit `text`.
    pub fn close(&mut self, text: impl AsRef<str>) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
    }

    /// Dedent, emit `text`, indent again (`} else {`).
    pub fn reopen(&mut self, text: impl AsRef<str>) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
        self.depth += 1;
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Labels sit one level left of the code they head.
    pub fn label(&mut self, name: impl AsRef<str>) {
        let depth = self.depth;
        self.depth = depth.saturating_sub(1);
        self.line(format!("{}:", name.as_ref()));
        self.depth = depth;
    }

    /// A name unique within this emitter, e.g. `matched_0`.
    pub fn fresh(&mut self, stem: &str) -> String {
        let name = format!("{}_{}", stem, self.fresh);
        self.fresh += 1;
        name
    }

    pub fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nesting_and_labels() {
        let mut e = Emitter::new();
        e.open("void f(void) {");
        e.label("S0");
        e.line("return;");
        e.close("}");
        assert_eq!(e.finish(), "void f(void) {\nS0:\n    return;\n}\n");
    }

    #[test]
    fn fresh_names_are_distinct() {
        let mut e = Emitter::new();
        assert_eq!(e.fresh("matched"), "matched_0");
        assert_eq!(e.fresh("matched"), "matched_1");
    }
}
