//! Implemented stdlib shims: thin wrappers whose behavior is
//! self-contained enough to carry in the runtime proper. Everything else
//! in the shim surface stays a declaration-only interface.

use crate::bytes::{bytes_slice_of, make_bytes};
use crate::string::{make_string, str_bytes};

// subprocess ---------------------------------------------------------------

/// Run a shell command string; returns the exit code.
///
/// # Safety
/// `cmd` must be a live string payload.
unsafe fn run_shell(cmd: *mut u8) -> i32 {
    let command = String::from_utf8_lossy(unsafe { str_bytes(cmd) }).into_owned();
    let status = std::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .status();
    match status {
        Ok(s) => s.code().unwrap_or(-1),
        Err(_) => -1,
    }
}

/// # Safety
/// `cmd` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_subprocess_run(cmd: *mut u8) -> i32 {
    unsafe { run_shell(cmd) }
}

/// # Safety
/// `cmd` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_subprocess_call(cmd: *mut u8) -> i32 {
    unsafe { run_shell(cmd) }
}

/// Raises CalledProcessError on a non-zero exit.
///
/// # Safety
/// `cmd` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_subprocess_check_call(cmd: *mut u8) -> i32 {
    let code = unsafe { run_shell(cmd) };
    if code != 0 {
        crate::exceptions::raise_str(
            "CalledProcessError",
            &format!("command exited with status {}", code),
        );
    }
    code
}

// sys ----------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn pycc_sys_platform() -> *mut u8 {
    let platform = if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "macos") {
        "darwin"
    } else if cfg!(target_os = "windows") {
        "win32"
    } else {
        "unknown"
    };
    make_string(platform.as_bytes())
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_sys_version() -> *mut u8 {
    make_string(concat!("pycc ", env!("CARGO_PKG_VERSION")).as_bytes())
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_sys_maxsize() -> i64 {
    i64::MAX
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_sys_exit(code: i32) {
    std::process::exit(code);
}

// time ---------------------------------------------------------------------

/// Sleep for a (possibly fractional) number of seconds; non-positive
/// durations return immediately.
#[unsafe(no_mangle)]
pub extern "C" fn pycc_time_sleep(seconds: f64) {
    if seconds.is_finite() && seconds > 0.0 {
        std::thread::sleep(std::time::Duration::from_secs_f64(seconds));
    }
}

// os.path ------------------------------------------------------------------

/// # Safety
/// Both operands must be live string payloads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_os_path_join(a: *mut u8, b: *mut u8) -> *mut u8 {
    unsafe {
        let base = String::from_utf8_lossy(str_bytes(a)).into_owned();
        let tail = String::from_utf8_lossy(str_bytes(b)).into_owned();
        let joined = std::path::Path::new(&base).join(tail);
        make_string(joined.to_string_lossy().as_bytes())
    }
}

/// # Safety
/// `p` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_os_path_basename(p: *mut u8) -> *mut u8 {
    let path = String::from_utf8_lossy(unsafe { str_bytes(p) }).into_owned();
    let base = std::path::Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    make_string(base.as_bytes())
}

/// # Safety
/// `p` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_os_path_dirname(p: *mut u8) -> *mut u8 {
    let path = String::from_utf8_lossy(unsafe { str_bytes(p) }).into_owned();
    let dir = std::path::Path::new(&path)
        .parent()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    make_string(dir.as_bytes())
}

/// # Safety
/// `p` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_os_path_exists(p: *mut u8) -> bool {
    let path = String::from_utf8_lossy(unsafe { str_bytes(p) }).into_owned();
    std::path::Path::new(&path).exists()
}

// json ---------------------------------------------------------------------

unsafe fn json_value(v: *mut u8) -> String {
    use crate::gc::{object_tag, TypeTag};
    if v.is_null() {
        return "null".to_string();
    }
    unsafe {
        match object_tag(v) {
            Some(TypeTag::Int) => crate::boxed::pycc_box_int_value(v).to_string(),
            Some(TypeTag::Float) => format!("{}", crate::boxed::pycc_box_float_value(v)),
            Some(TypeTag::Bool) => if crate::boxed::pycc_box_bool_value(v) {
                "true".to_string()
            } else {
                "false".to_string()
            },
            Some(TypeTag::String) => {
                format!("{:?}", String::from_utf8_lossy(str_bytes(v)))
            }
            Some(TypeTag::List) => json_list(v),
            Some(TypeTag::Dict) => json_dict(v),
            _ => "null".to_string(),
        }
    }
}

unsafe fn json_list(list: *mut u8) -> String {
    unsafe {
        let len = crate::list::list_len_of(list);
        let items = crate::list::list_items(list);
        let parts: Vec<String> = (0..len).map(|i| json_value(*items.add(i))).collect();
        format!("[{}]", parts.join(","))
    }
}

unsafe fn json_dict(d: *mut u8) -> String {
    unsafe {
        let cap = crate::dict::dict_cap_of(d);
        let keys = crate::dict::dict_keys(d);
        let values = crate::dict::dict_values(d);
        let mut parts = Vec::new();
        for i in 0..cap {
            let k = *keys.add(i);
            if k.is_null() {
                continue;
            }
            parts.push(format!(
                "{:?}:{}",
                String::from_utf8_lossy(str_bytes(k)),
                json_value(*values.add(i))
            ));
        }
        format!("{{{}}}", parts.join(","))
    }
}

/// Render a list of runtime objects as a JSON string object.
///
/// # Safety
/// `list` must be a live list payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_json_dump_list(list: *mut u8) -> *mut u8 {
    make_string(unsafe { json_list(list) }.as_bytes())
}

/// # Safety
/// `d` must be a live dict payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_json_dump_dict(d: *mut u8) -> *mut u8 {
    make_string(unsafe { json_dict(d) }.as_bytes())
}

// struct -------------------------------------------------------------------

fn field_size(c: char) -> Option<usize> {
    Some(match c {
        'b' | 'B' => 1,
        'h' | 'H' => 2,
        'i' | 'I' | 'l' | 'L' => 4,
        'q' | 'Q' => 8,
        _ => return None,
    })
}

fn parse_format(fmt: &str) -> Option<(bool, Vec<char>)> {
    let mut chars = fmt.chars().peekable();
    let little = match chars.peek() {
        Some('<') => {
            chars.next();
            true
        }
        Some('>') => {
            chars.next();
            false
        }
        _ => true,
    };
    let fields: Vec<char> = chars.collect();
    if fields.iter().all(|c| field_size(*c).is_some()) {
        Some((little, fields))
    } else {
        None
    }
}

/// Byte size of a fixed integer format string; raises on unknown codes.
///
/// # Safety
/// `fmt` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_struct_calcsize(fmt: *mut u8) -> i64 {
    let text = String::from_utf8_lossy(unsafe { str_bytes(fmt) }).into_owned();
    match parse_format(&text) {
        Some((_, fields)) => fields.iter().map(|c| field_size(*c).unwrap() as i64).sum(),
        None => {
            crate::exceptions::raise_str("error", "bad struct format");
            0
        }
    }
}

/// Pack a list of boxed ints into a bytes object.
///
/// # Safety
/// `fmt` must be a live string payload; `values` a live list payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_struct_pack(fmt: *mut u8, values: *mut u8) -> *mut u8 {
    let text = String::from_utf8_lossy(unsafe { str_bytes(fmt) }).into_owned();
    let Some((little, fields)) = parse_format(&text) else {
        crate::exceptions::raise_str("error", "bad struct format");
        return std::ptr::null_mut();
    };
    unsafe {
        if crate::list::list_len_of(values) != fields.len() {
            crate::exceptions::raise_str("error", "struct.pack arity mismatch");
            return std::ptr::null_mut();
        }
        let items = crate::list::list_items(values);
        let mut out = Vec::new();
        for (i, c) in fields.iter().enumerate() {
            let v = crate::boxed::pycc_box_int_value(*items.add(i));
            let size = field_size(*c).unwrap();
            let le = v.to_le_bytes();
            let be = v.to_be_bytes();
            if little {
                out.extend_from_slice(&le[..size]);
            } else {
                out.extend_from_slice(&be[8 - size..]);
            }
        }
        make_bytes(&out)
    }
}

/// Unpack a bytes object into a list of boxed ints.
///
/// # Safety
/// `fmt` must be a live string payload; `data` a live bytes payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_struct_unpack(fmt: *mut u8, data: *mut u8) -> *mut u8 {
    let text = String::from_utf8_lossy(unsafe { str_bytes(fmt) }).into_owned();
    let Some((little, fields)) = parse_format(&text) else {
        crate::exceptions::raise_str("error", "bad struct format");
        return std::ptr::null_mut();
    };
    unsafe {
        let bytes = bytes_slice_of(data);
        let total: usize = fields.iter().map(|c| field_size(*c).unwrap()).sum();
        if bytes.len() != total {
            crate::exceptions::raise_str("error", "struct.unpack size mismatch");
            return std::ptr::null_mut();
        }
        let mut list = crate::list::make_list(fields.len());
        crate::gc::pycc_gc_register_root(&mut list);
        let mut offset = 0;
        for c in &fields {
            let size = field_size(*c).unwrap();
            let mut buf = [0u8; 8];
            if little {
                buf[..size].copy_from_slice(&bytes[offset..offset + size]);
            } else {
                buf[8 - size..].copy_from_slice(&bytes[offset..offset + size]);
            }
            let v = if little {
                i64::from_le_bytes(buf)
            } else {
                i64::from_be_bytes(buf)
            };
            crate::list::pycc_list_push(&mut list, crate::boxed::pycc_box_int(v));
            offset += size;
        }
        crate::gc::pycc_gc_unregister_root(&mut list);
        list
    }
}

// Encoding and crypto (feature-gated crates) -------------------------------

#[cfg(feature = "shims")]
mod crypto {
    use super::*;
    use base64::Engine as _;
    use rand::{Rng as _, SeedableRng as _};
    use sha2::Digest as _;
    use std::sync::Mutex;

    static RNG: Mutex<Option<rand::rngs::StdRng>> = Mutex::new(None);

    fn with_rng<T>(f: impl FnOnce(&mut rand::rngs::StdRng) -> T) -> T {
        let mut guard = RNG.lock().expect("rng lock poisoned");
        let rng = guard.get_or_insert_with(rand::rngs::StdRng::from_entropy);
        f(rng)
    }

    /// # Safety
    /// `data` must be a live bytes payload.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn pycc_base64_b64encode(data: *mut u8) -> *mut u8 {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(unsafe { bytes_slice_of(data) });
        make_bytes(encoded.as_bytes())
    }

    /// Raises on malformed input.
    ///
    /// # Safety
    /// `data` must be a live bytes payload.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn pycc_base64_b64decode(data: *mut u8) -> *mut u8 {
        match base64::engine::general_purpose::STANDARD.decode(unsafe { bytes_slice_of(data) }) {
            Ok(decoded) => make_bytes(&decoded),
            Err(_) => {
                crate::exceptions::raise_str("binascii.Error", "invalid base64");
                std::ptr::null_mut()
            }
        }
    }

    /// # Safety
    /// `data` must be a live bytes payload.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn pycc_binascii_hexlify(data: *mut u8) -> *mut u8 {
        make_bytes(hex::encode(unsafe { bytes_slice_of(data) }).as_bytes())
    }

    /// # Safety
    /// `data` must be a live bytes payload.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn pycc_binascii_unhexlify(data: *mut u8) -> *mut u8 {
        match hex::decode(unsafe { bytes_slice_of(data) }) {
            Ok(decoded) => make_bytes(&decoded),
            Err(_) => {
                crate::exceptions::raise_str("binascii.Error", "non-hexadecimal digit");
                std::ptr::null_mut()
            }
        }
    }

    /// Hex digest of sha256 over a string payload.
    ///
    /// # Safety
    /// `data` must be a live string payload.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn pycc_hashlib_sha256(data: *mut u8) -> *mut u8 {
        let digest = sha2::Sha256::digest(unsafe { str_bytes(data) });
        make_string(hex::encode(digest).as_bytes())
    }

    /// # Safety
    /// `data` must be a live string payload.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn pycc_hashlib_sha512(data: *mut u8) -> *mut u8 {
        let digest = sha2::Sha512::digest(unsafe { str_bytes(data) });
        make_string(hex::encode(digest).as_bytes())
    }

    /// HMAC hex digest; only "sha256" is supported as the digestmod.
    ///
    /// # Safety
    /// All operands must be live string payloads.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn pycc_hmac_digest(
        key: *mut u8,
        msg: *mut u8,
        digestmod: *mut u8,
    ) -> *mut u8 {
        use hmac::Mac as _;
        unsafe {
            if str_bytes(digestmod) != b"sha256" {
                crate::exceptions::raise_str("ValueError", "unsupported digestmod");
                return std::ptr::null_mut();
            }
            let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(str_bytes(key))
                .expect("hmac accepts any key length");
            mac.update(str_bytes(msg));
            make_string(hex::encode(mac.finalize().into_bytes()).as_bytes())
        }
    }

    #[unsafe(no_mangle)]
    pub extern "C" fn pycc_uuid_uuid4() -> *mut u8 {
        make_string(uuid::Uuid::new_v4().to_string().as_bytes())
    }

    #[unsafe(no_mangle)]
    pub extern "C" fn pycc_random_random() -> f64 {
        with_rng(|rng| rng.r#gen::<f64>())
    }

    /// Inclusive-range integer, Python style.
    #[unsafe(no_mangle)]
    pub extern "C" fn pycc_random_randint(lo: i64, hi: i64) -> i64 {
        if lo > hi {
            crate::exceptions::raise_str("ValueError", "empty range for randint");
            return 0;
        }
        with_rng(|rng| rng.gen_range(lo..=hi))
    }

    #[unsafe(no_mangle)]
    pub extern "C" fn pycc_random_seed(seed: i64) {
        let mut guard = RNG.lock().expect("rng lock poisoned");
        *guard = Some(rand::rngs::StdRng::seed_from_u64(seed as u64));
    }

    #[unsafe(no_mangle)]
    pub extern "C" fn pycc_secrets_token_hex(nbytes: i64) -> *mut u8 {
        let n = nbytes.max(0) as usize;
        let bytes: Vec<u8> = with_rng(|rng| (0..n).map(|_| rng.r#gen()).collect());
        make_string(hex::encode(bytes).as_bytes())
    }
}

#[cfg(feature = "shims")]
pub use crypto::*;
