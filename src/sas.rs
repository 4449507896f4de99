//! Short authenticated strings
//!
//! Both sides of an honest key agreement derive the same key, so both render
//! the same string. A man in the middle ends up with two different keys and
//! the humans comparing the strings see the mismatch.

use std::fmt;

/// Number of key bytes rendered into a SAS
pub const SAS_BYTES: usize = 8;

const PREFIXES: &str = "dozmarbinwansamlitsighidfidlissogdirwacsabwissibrigsoldopmodfoglidhopdardorlorhodfolrintogsilmirholpaslacrovlivdalsatlibtabhanticpidtorbolfosdotlosdilforpilramtirwintadbicdifrocwidbisdasmidloprilnardapmolsanlocnovsitnidtipsicropwitnatpanminritpodmottamtolsavposnapnopsomfinfonbanmorworsipronnorbotwicsocwatdolmagpicdavbidbaltimtasmalligsivtagpadsaldivdactansidfabtarmonranniswolmispallasdismaprabtobrollatlonnodnavfignomnibpagsopralbilhaddocridmocpacravripfaltodtiltinhapmicfanpattaclabmogsimsonpinlomrictapfirhasbosbatpochactidhavsaplindibhosdabbitbarracparloddosbortochilmactomdigfilfasmithobharmighinradmashalraglagfadtopmophabnilnosmilfopfamdatnoldinhatnacrisfotribhocnimlarfitwalrapsarnalmoslandondanladdovrivbacpollaptalpitnambonrostonfodponsovnocsorlavmatmipfip";

const SUFFIXES: &str = "zodnecbudwessevpersutletfulpensytdurwepserwylsunrypsyxdyrnuphebpeglupdepdysputlughecryttyvsydnexlunmeplutseppesdelsulpedtemledtulmetwenbynhexfebpyldulhetmevruttylwydtepbesdexsefwycburderneppurrysrebdennutsubpetrulsynregtydsupsemwynrecmegnetsecmulnymtevwebsummutnyxrextebfushepbenmuswyxsymselrucdecwexsyrwetdylmynmesdetbetbeltuxtugmyrpelsyptermebsetdutdegtexsurfeltudnuxruxrenwytnubmedlytdusnebrumtynseglyxpunresredfunrevrefmectedrusbexlebduxrynnumpyxrygryxfeptyrtustyclegnemfermertenlusnussyltecmexpubrymtucfyllepdebbermughuttunbylsudpemdevlurdefbusbeprunmelpexdytbyttyplevmylwedducfurfexnulluclennerlexrupnedlecrydlydfenwelnydhusrelrudneshesfetdesretdunlernyrsebhulrylludremlysfynwerrycsugnysnyllyndyndemluxfedsedbecmunlyrtesmudnytbyrsenwegfyrmurtelreptegpecnelnevfes";

fn syllable(table: &'static str, byte: u8) -> &'static str {
    let start = usize::from(byte) * 3;
    &table[start..start + 3]
}

/// Render bytes as Urbit-style syllable pairs joined by `-`
///
/// Even-indexed bytes pick a prefix syllable, odd-indexed bytes a suffix
/// syllable. A trailing unpaired byte renders as a lone prefix.
pub fn urbit_like(bytes: &[u8]) -> String {
    bytes
        .chunks(2)
        .map(|pair| match pair {
            [p, s] => format!("{}{}", syllable(PREFIXES, *p), syllable(SUFFIXES, *s)),
            [p] => syllable(PREFIXES, *p).to_string(),
            _ => String::new(),
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Render bytes as a 6-digit decimal code
pub fn numeric(bytes: &[u8]) -> String {
    let mut word = [0u8; 4];
    for (dst, src) in word.iter_mut().zip(bytes) {
        *dst = *src;
    }
    format!("{:06}", u32::from_be_bytes(word) % 1_000_000)
}

/// Short authenticated string for one completed exchange
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sas {
    bytes: [u8; SAS_BYTES],
}

impl Sas {
    /// Take the first [`SAS_BYTES`] bytes of a derived key
    ///
    /// Shorter input is zero-padded.
    pub fn from_key(key: &[u8]) -> Self {
        let mut bytes = [0u8; SAS_BYTES];
        for (dst, src) in bytes.iter_mut().zip(key) {
            *dst = *src;
        }
        Self { bytes }
    }

    /// Syllable rendering, e.g. `fipfes-fipfes-dozzod-dozzod`
    pub fn urbit_like(&self) -> String {
        urbit_like(&self.bytes)
    }

    /// Numeric rendering, e.g. `042917`
    pub fn numeric(&self) -> String {
        numeric(&self.bytes)
    }
}

impl fmt::Display for Sas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.urbit_like())
    }
}

impl fmt::Debug for Sas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sas({})", self.urbit_like())
    }
}
