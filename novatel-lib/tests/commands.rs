mod common;

use common::load_db;
use novatel::{Commander, EncodeFormat, Error};
use test_case::test_case;

const CONFIGCODE: &str =
    r#"CONFIGCODE ERASE_TABLE "WJ4HDW" "GM5Z99" "T2M7DP" "KG2T8T" "KF7GKR" "TABLECLEAR""#;

#[test]
fn test_configcode_ascii() {
    let out = Commander::new(load_db())
        .encode(CONFIGCODE, EncodeFormat::Ascii)
        .unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "#CONFIGCODEA,THISPORT,0,0.0,UNKNOWN,0,0.000,00000000,dbc9,0;ERASE_TABLE,\"WJ4HDW\",\"GM5Z99\",\"T2M7DP\",\"KG2T8T\",\"KF7GKR\",\"TABLECLEAR\"*69419dec\r\n"
    );
}

#[test]
fn test_configcode_binary() {
    let out = Commander::new(load_db())
        .encode(CONFIGCODE, EncodeFormat::Binary)
        .unwrap();
    let expected = hex::decode(concat!(
        "AA44121C110400C03800",
        "0000000000000000000000000000",
        "C9DB0000",
        "07000000",
        "574A344844570000",
        "474D355A39390000",
        "54324D3744500000",
        "4B47325438540000",
        "4B4637474B520000",
        "5441424C45434C4541520000",
        "06F35445",
    ))
    .unwrap();
    assert_eq!(out, expected);
}

#[test]
fn test_double_precision_from_conversion_string() {
    let out = Commander::new(load_db())
        .encode("INSTHRESHOLDS LOW 0.0 0.0 0.0", EncodeFormat::Ascii)
        .unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "#INSTHRESHOLDSA,THISPORT,0,0.0,UNKNOWN,0,0.000,00000000,48a5,0;LOW,0.000000000,0.000000000,0.000000000*3989c2ac\r\n"
    );
}

#[test]
fn test_command_output_is_parseable() {
    let db = load_db();
    let out = Commander::new(db.clone())
        .encode("UALCONTROL ENABLE 2.0 1.0", EncodeFormat::Binary)
        .unwrap();

    let mut parser = novatel::Parser::new(db).with_encode_format(EncodeFormat::Ascii);
    parser.write(&out);
    let msg = parser.read().unwrap().expect("a message");
    let text = String::from_utf8_lossy(msg.bytes()).into_owned();
    assert!(
        text.starts_with("#UALCONTROLA,THISPORT,0,0.0,UNKNOWN,0,0.000,00000000,49a3,0;ENABLE,2.000000,1.000000*"),
        "{text}"
    );
}

#[test_case("LOG THISPORT BESTPOSA ONCE"; "missing log parameters")]
#[test_case("INSTHRESHOLDS LOW 0.0 zero 0.0"; "bad number")]
#[test_case("UALCONTROL"; "no parameters")]
fn test_malformed(command: &str) {
    let err = Commander::new(load_db())
        .encode(command, EncodeFormat::Ascii)
        .unwrap_err();
    assert!(matches!(err, Error::MalformedInput(_)), "{err:?}");
}

#[test]
fn test_unknown_command() {
    let err = Commander::new(load_db())
        .encode("NOTACOMMAND 1 2 3", EncodeFormat::Binary)
        .unwrap_err();
    assert!(matches!(err, Error::NoDefinition(_)), "{err:?}");
}
