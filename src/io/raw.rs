/// Read / write float arrays as raw little-endian `f32`

use std::fs::File;
use std::io::{Write, Read, Seek, SeekFrom, BufWriter, BufReader};
use std::path::Path;

type IORes<T> = std::io::Result<T>;

pub fn write(data: impl Iterator<Item = f32>, path: &Path) -> IORes<()> {
    let file = File::create(path)?;
    write_to(data, &mut BufWriter::new(file))
}

/// Append `data` to an open writer
pub fn write_to(data: impl Iterator<Item = f32>, out: &mut impl Write) -> IORes<()> {
    for datum in data {
        out.write_all(&datum.to_le_bytes())?;
    }
    out.flush()
}

pub fn read<'a>(path: &Path) -> IORes<impl Iterator<Item = IORes<f32>> + 'a> {
    let file = File::open(path)?;
    Ok(values(BufReader::new(file)))
}

/// Number of `f32` values held in the file at `path`
pub fn len(path: &Path) -> IORes<usize> {
    let bytes = std::fs::metadata(path)?.len() as usize;
    if bytes % 4 != 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData,
                                       format!("{} is not a whole number of f32s", path.display())))
    }
    Ok(bytes / 4)
}

/// Read the `count` values following the first `skip` values in the file at
/// `path`. Fails if the file ends early.
pub fn read_range(path: &Path, skip: usize, count: usize) -> IORes<Vec<f32>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(4 * skip as u64))?;
    let mut buf = BufReader::new(file);
    let mut out = Vec::with_capacity(count);
    let mut buffer = [0; 4];
    for _ in 0..count {
        buf.read_exact(&mut buffer)?;
        out.push(f32::from_le_bytes(buffer));
    }
    Ok(out)
}

fn values<'a>(mut buf: impl Read + 'a) -> impl Iterator<Item = IORes<f32>> + 'a {
    let mut buffer = [0; 4];
    std::iter::from_fn(move || {
        use std::io::ErrorKind::UnexpectedEof;
        match buf.read_exact(&mut buffer) {
            Ok(()) => Some(Ok(f32::from_le_bytes(buffer))),
            Err(e) if e.kind() == UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    })
}
