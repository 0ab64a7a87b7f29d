use std::io::{self, BufWriter, Stdout, Write};

use anyhow::Result;
use serde::Serialize;

/// One JSON document per line.
pub struct JsonLines<W: Write> {
    writer: W,
}

impl JsonLines<BufWriter<Stdout>> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(BufWriter::new(io::stdout()))
    }
}

impl<W: Write> JsonLines<W> {
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write<T: Serialize + ?Sized>(&mut self, item: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, item)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn write_one<T: Serialize + ?Sized>(mut self, item: &T) -> Result<()> {
        self.write(item)?;
        self.flush()
    }

    pub fn write_all<T: Serialize>(mut self, items: &[T]) -> Result<()> {
        for item in items {
            self.write(item)?;
        }
        self.flush()
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.writer
    }
}
