#![allow(dead_code)]
use std::path::PathBuf;
use std::sync::Arc;

use novatel::MessageDatabase;

pub const BESTPOS_ASCII: &[u8] = b"#BESTPOSA,COM1,0,83.5,FINESTEERING,2163,329760.000,02400000,b1f6,65535;SOL_COMPUTED,SINGLE,51.15043874397,-114.03066788586,1097.6822,-17.0000,WGS84,1.3648,1.1806,3.1112,\"\",0.000,0.000,18,18,18,0,00,02,11,01*c3194e35\r\n";

pub const RAWIMUSX_SHORT_ASCII: &[u8] = b"%RAWIMUSXA,1692,484620.664;00,11,1692,484620.664389000,00801503,43110635,-817242,-202184,-215194,-41188,-9895*a5db8c7b\r\n";

pub const BESTSATS_ASCII: &[u8] = b"#BESTSATSA,COM1,0,60.5,FINESTEERING,2167,242406.000,02000020,cb34,16809;3,GPS,3,GOOD,00000003,GLONASS,4+1,GOOD,00000003,GLONASS,9-2,LOCKEDOUT,00000001*1bf438fb\r\n";

pub const RANGE_ASCII: &[u8] = b"#RANGEA,COM1,0,72.0,FINESTEERING,2167,242406.000,02000020,8fbd,16809;2,14,0,21773388.569,0.046,-114419462.064,0.006,1678.479,47.5,8426.920,08109c04,22,0,23468914.231,0.098,-123329474.581,0.008,-2783.750,41.0,613.600,18109c24*92748572\r\n";

pub const VERSION_ASCII: &[u8] = b"#VERSIONA,COM1,0,55.0,UNKNOWN,0,0.000,02000000,b02d,16809;1,GPSCARD,\"FFNRNNCBES1\",\"BMHR15470120X\",\"OEM719-1.01\",\"OM7CR0707RN0000\",\"OM7BR0000RBG000\",\"2020/Apr/09\",\"13:40:45\"*a4d22b96\r\n";

pub fn fixture_path(name: &str) -> PathBuf {
    let mut path =
        PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    path.push("tests/fixtures");
    path.push(name);
    path
}

pub fn load_db() -> Arc<MessageDatabase> {
    let db = MessageDatabase::from_file(fixture_path("database.json")).expect("loading database");
    Arc::new(db)
}
