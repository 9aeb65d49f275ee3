//! Minimal NumPy `.npy` reader/writer for the sorting arrays.
//!
//! Supports format versions 1.0-3.0, C order, numeric dtypes `f4 f8 i1 i2 i4 i8 u1 u2 u4 u8`
//! in either byte order.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use regex::Regex;

use spikecore::data::events::FeatureMatrix;
use crate::error::{SessionError, SessionResult};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGN: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub enum NpyData {
    Float(Vec<f64>),
    Int(Vec<i64>),
}

impl NpyData {
    pub fn len(&self) -> usize {
        match self {
            NpyData::Float(v) => v.len(),
            NpyData::Int(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NpyArray {
    pub path: PathBuf,
    pub shape: Vec<usize>,
    pub data: NpyData,
}

#[derive(Debug, Clone, PartialEq)]
struct Header {
    big_endian: bool,
    kind: char,
    size: usize,
    fortran_order: bool,
    shape: Vec<usize>,
}

fn npy_err(path: &Path, msg: impl Into<String>) -> SessionError {
    SessionError::Npy { path: path.to_path_buf(), msg: msg.into() }
}

fn header_regexes() -> &'static (Regex, Regex, Regex) {
    static RE: OnceLock<(Regex, Regex, Regex)> = OnceLock::new();
    RE.get_or_init(|| {
        (
            Regex::new(r"'descr'\s*:\s*'([<>|=])([fiu])(\d+)'").expect("valid descr regex"),
            Regex::new(r"'fortran_order'\s*:\s*(True|False)").expect("valid fortran regex"),
            Regex::new(r"'shape'\s*:\s*\(([^)]*)\)").expect("valid shape regex"),
        )
    })
}

fn parse_header(text: &str) -> Result<Header, String> {
    let (re_descr, re_fortran, re_shape) = header_regexes();

    let descr = re_descr.captures(text).ok_or_else(|| format!("unsupported descr in header {:?}", text))?;
    let big_endian = &descr[1] == ">";
    let kind = descr[2].chars().next().unwrap_or('?');
    let size: usize = descr[3].parse().map_err(|_| format!("bad item size {:?}", &descr[3]))?;

    let fortran_order = re_fortran
        .captures(text)
        .map(|c| &c[1] == "True")
        .ok_or_else(|| "missing fortran_order".to_string())?;

    let shape_txt = re_shape.captures(text).ok_or_else(|| "missing shape".to_string())?;
    let shape = shape_txt[1]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('L').parse::<usize>().map_err(|_| format!("bad shape entry {:?}", s)))
        .collect::<Result<Vec<usize>, String>>()?;

    Ok(Header { big_endian, kind, size, fortran_order, shape })
}

fn read_values<B: ByteOrder, R: Read>(r: &mut R, kind: char, size: usize, n: usize) -> io::Result<Option<NpyData>> {
    let data = match (kind, size) {
        ('f', 4) => {
            let mut v = vec![0f32; n];
            r.read_f32_into::<B>(&mut v)?;
            NpyData::Float(v.into_iter().map(f64::from).collect())
        }
        ('f', 8) => {
            let mut v = vec![0f64; n];
            r.read_f64_into::<B>(&mut v)?;
            NpyData::Float(v)
        }
        ('i', 1) => {
            let mut v = vec![0i8; n];
            r.read_i8_into(&mut v)?;
            NpyData::Int(v.into_iter().map(i64::from).collect())
        }
        ('i', 2) => {
            let mut v = vec![0i16; n];
            r.read_i16_into::<B>(&mut v)?;
            NpyData::Int(v.into_iter().map(i64::from).collect())
        }
        ('i', 4) => {
            let mut v = vec![0i32; n];
            r.read_i32_into::<B>(&mut v)?;
            NpyData::Int(v.into_iter().map(i64::from).collect())
        }
        ('i', 8) => {
            let mut v = vec![0i64; n];
            r.read_i64_into::<B>(&mut v)?;
            NpyData::Int(v)
        }
        ('u', 1) => {
            let mut v = vec![0u8; n];
            r.read_exact(&mut v)?;
            NpyData::Int(v.into_iter().map(i64::from).collect())
        }
        ('u', 2) => {
            let mut v = vec![0u16; n];
            r.read_u16_into::<B>(&mut v)?;
            NpyData::Int(v.into_iter().map(i64::from).collect())
        }
        ('u', 4) => {
            let mut v = vec![0u32; n];
            r.read_u32_into::<B>(&mut v)?;
            NpyData::Int(v.into_iter().map(i64::from).collect())
        }
        ('u', 8) => {
            let mut v = vec![0u64; n];
            r.read_u64_into::<B>(&mut v)?;
            let mut out = Vec::with_capacity(n);
            for x in v {
                match i64::try_from(x) {
                    Ok(x) => out.push(x),
                    Err(_) => return Ok(None),
                }
            }
            NpyData::Int(out)
        }
        _ => return Ok(None),
    };
    Ok(Some(data))
}

pub fn read_npy(path: &Path) -> SessionResult<NpyArray> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 6];
    r.read_exact(&mut magic).map_err(|_| npy_err(path, "file too short"))?;
    if &magic != MAGIC {
        return Err(npy_err(path, "bad magic string"));
    }
    let major = r.read_u8().map_err(|_| npy_err(path, "truncated version"))?;
    let _minor = r.read_u8().map_err(|_| npy_err(path, "truncated version"))?;
    let (header_len, prefix_len) = match major {
        1 => r.read_u16::<LittleEndian>().map(|n| (u64::from(n), 10u64)),
        2 | 3 => r.read_u32::<LittleEndian>().map(|n| (u64::from(n), 12u64)),
        v => return Err(npy_err(path, format!("unsupported format version {}", v))),
    }
    .map_err(|_| npy_err(path, "truncated header length"))?;

    // sizes written in the file are checked against its length before allocating
    let payload_len = file_len
        .checked_sub(prefix_len + header_len)
        .ok_or_else(|| npy_err(path, "truncated header"))?;
    let header_len = usize::try_from(header_len).map_err(|_| npy_err(path, "header too large"))?;

    let mut header_bytes = vec![0u8; header_len];
    r.read_exact(&mut header_bytes).map_err(|_| npy_err(path, "truncated header"))?;
    let text = String::from_utf8_lossy(&header_bytes);
    let header = parse_header(&text).map_err(|msg| npy_err(path, msg))?;

    if header.fortran_order && header.shape.len() > 1 {
        return Err(npy_err(path, "fortran-ordered arrays are not supported"));
    }

    let n = header
        .shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| npy_err(path, format!("shape {:?} overflows", header.shape)))?;
    let needed = n
        .checked_mul(header.size)
        .and_then(|b| u64::try_from(b).ok())
        .ok_or_else(|| npy_err(path, format!("shape {:?} overflows", header.shape)))?;
    if needed > payload_len {
        return Err(npy_err(
            path,
            format!("truncated data: shape {:?} needs {} bytes, file has {}", header.shape, needed, payload_len),
        ));
    }
    let values = if header.big_endian {
        read_values::<BigEndian, _>(&mut r, header.kind, header.size, n)
    } else {
        read_values::<LittleEndian, _>(&mut r, header.kind, header.size, n)
    }
    .map_err(|e| npy_err(path, format!("truncated data: {}", e)))?;

    let data = values.ok_or_else(|| {
        npy_err(path, format!("unsupported dtype {}{}", header.kind, header.size))
    })?;

    Ok(NpyArray { path: path.to_path_buf(), shape: header.shape, data })
}

impl NpyArray {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_f64_vec(self) -> Vec<f64> {
        match self.data {
            NpyData::Float(v) => v,
            NpyData::Int(v) => v.into_iter().map(|x| x as f64).collect(),
        }
    }

    /// Integer arrays only; values must fit `i32`.
    pub fn into_i32_vec(self) -> SessionResult<Vec<i32>> {
        let NpyArray { path, data, .. } = self;
        match data {
            NpyData::Int(v) => v
                .into_iter()
                .map(|x| i32::try_from(x).map_err(|_| npy_err(&path, format!("value {} does not fit i32", x))))
                .collect(),
            NpyData::Float(_) => Err(npy_err(&path, "expected an integer array")),
        }
    }

    /// 2-D `(n_events, n_dims)`; a 1-D array is read as a single column.
    pub fn into_feature_matrix(self) -> SessionResult<FeatureMatrix> {
        let n_dims = match self.shape.as_slice() {
            [_] => 1,
            [_, d] => *d,
            s => return Err(npy_err(&self.path, format!("expected 1-D or 2-D array, got shape {:?}", s))),
        };
        let values: Vec<f32> = self.into_f64_vec().into_iter().map(|x| x as f32).collect();
        Ok(FeatureMatrix::new(values, n_dims)?)
    }
}

fn shape_literal(shape: &[usize]) -> String {
    match shape {
        [n] => format!("({},)", n),
        dims => format!("({})", dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")),
    }
}

fn write_header<W: Write>(w: &mut W, descr: &str, shape: &[usize]) -> io::Result<()> {
    let mut dict = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        descr,
        shape_literal(shape)
    );
    // magic + version + u16 length + dict + '\n' must be 64-byte aligned
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let pad = (ALIGN - unpadded % ALIGN) % ALIGN;
    dict.push_str(&" ".repeat(pad));
    dict.push('\n');

    w.write_all(MAGIC)?;
    w.write_all(&[1, 0])?;
    w.write_u16::<LittleEndian>(dict.len() as u16)?;
    w.write_all(dict.as_bytes())
}

pub fn write_npy_i32(path: &Path, values: &[i32]) -> SessionResult<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_header(&mut w, "<i4", &[values.len()])?;
    for &v in values {
        w.write_i32::<LittleEndian>(v)?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_npy_f64(path: &Path, values: &[f64]) -> SessionResult<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_header(&mut w, "<f8", &[values.len()])?;
    for &v in values {
        w.write_f64::<LittleEndian>(v)?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_npy_f32_2d(path: &Path, matrix: &FeatureMatrix) -> SessionResult<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_header(&mut w, "<f4", &[matrix.n_rows(), matrix.n_dims()])?;
    for row in matrix.rows() {
        for &v in row {
            w.write_f32::<LittleEndian>(v)?;
        }
    }
    w.flush()?;
    Ok(())
}
