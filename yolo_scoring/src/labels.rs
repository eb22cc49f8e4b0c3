use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabel {
    pub name: String,
    pub color: [u8; 3],
}

/// Class names indexed by the model's class-output position. Immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    labels: Vec<ClassLabel>,
}

impl LabelTable {
    pub fn load(filepath: &Path) -> io::Result<Self> {
        let file = File::open(filepath)?;
        let table = Self::parse(io::BufReader::new(file))?;
        tracing::info!("Loaded {} class labels from {:?}", table.len(), filepath);
        Ok(table)
    }

    /// One label per line, either `name` or `name,red,green,blue`. Blank lines are skipped.
    pub fn parse(reader: impl BufRead) -> io::Result<Self> {
        let mut entries: Vec<(String, Option<[u8; 3]>)> = Vec::new();

        for line_result in reader.lines() {
            let line = line_result?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let parts: Vec<&str> = line.split(',').collect();
            match parts.len() {
                1 => entries.push((line.to_string(), None)),
                4 => {
                    let channel = |value: &str, name: &str| {
                        value.trim().parse::<u8>().map_err(|_| {
                            io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("Invalid {} value in line: {}", name, line),
                            )
                        })
                    };
                    let color = [
                        channel(parts[1], "red")?,
                        channel(parts[2], "green")?,
                        channel(parts[3], "blue")?,
                    ];
                    entries.push((parts[0].trim().to_string(), Some(color)));
                }
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Invalid line format: {}", line),
                    ))
                }
            }
        }

        let count = entries.len();
        let labels = entries
            .into_iter()
            .enumerate()
            .map(|(index, (name, color))| ClassLabel {
                name,
                color: color.unwrap_or_else(|| spread_color(index, count)),
            })
            .collect();

        Ok(Self { labels })
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let count = names.len();
        let labels = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| ClassLabel {
                name,
                color: spread_color(index, count),
            })
            .collect();
        Self { labels }
    }

    pub fn get(&self, index: usize) -> Option<&ClassLabel> {
        self.labels.get(index)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Fully saturated hue evenly spaced over the class count.
fn spread_color(index: usize, count: usize) -> [u8; 3] {
    let hue = index as f32 / count.max(1) as f32 * 6.0;
    let sector = hue.floor() as u32 % 6;
    let fraction = hue - hue.floor();
    let rising = (fraction * 255.0).round() as u8;
    let falling = 255 - rising;

    match sector {
        0 => [255, rising, 0],
        1 => [falling, 255, 0],
        2 => [0, 255, rising],
        3 => [0, falling, 255],
        4 => [rising, 0, 255],
        _ => [255, 0, falling],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_plain_names() {
        let table = LabelTable::parse(Cursor::new("person\nbicycle\n\ncar\n")).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0).unwrap().name, "person");
        assert_eq!(table.get(2).unwrap().name, "car");
        assert!(table.get(3).is_none());
    }

    #[test]
    fn test_parse_colored_labels() {
        let table = LabelTable::parse(Cursor::new("person, 255, 0, 0\ndog,0,128,255\n")).unwrap();
        assert_eq!(
            table.get(0),
            Some(&ClassLabel {
                name: "person".to_string(),
                color: [255, 0, 0]
            })
        );
        assert_eq!(table.get(1).unwrap().color, [0, 128, 255]);
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        let err = LabelTable::parse(Cursor::new("person,255,0\n")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = LabelTable::parse(Cursor::new("person,300,0,0\n")).unwrap_err();
        assert!(err.to_string().contains("red"));
    }

    #[test]
    fn test_spread_color() {
        assert_eq!(spread_color(0, 6), [255, 0, 0]);
        assert_eq!(spread_color(2, 6), [0, 255, 0]);
        assert_eq!(spread_color(4, 6), [0, 0, 255]);
    }
}
