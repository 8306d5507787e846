//! Request-surface flows: passphrase lifecycle, node queries, signing.

use coffer_api::{
    dispatch, ERR_BAD_INPUT, ERR_CHECK_DECRYPT, ERR_CHECK_MISMATCH, ERR_INSUFFICIENT_FUNDS,
    ERR_KDF_OR_RNG, ERR_UNKNOWN_METHOD,
};
use serde_json::{json, Value};

const BAD_HEX: &str = "dcc6f85d0733485b7d50a5faabeec8b330a35dbe9bca4ff227d147adf151823e";

fn field<'a>(reply: &'a Value, name: &str) -> &'a str {
    reply[name]
        .as_str()
        .unwrap_or_else(|| panic!("missing field {name}: {reply}"))
}

/// A wrong key usually garbles the padding (-2); about one time in 256 the
/// garbled plaintext pads correctly and fails the comparison instead (-3).
fn assert_check_rejected(reply: &Value, context: &str) {
    let code = reply["error_code"].as_i64().unwrap_or(0);
    assert!(
        code == ERR_CHECK_DECRYPT || code == ERR_CHECK_MISMATCH,
        "{context}: expected check rejection, got {reply}"
    );
}

#[test]
fn test_passphrase_lifecycle() {
    // set a new passphrase from nothing
    let created = dispatch("set-passphrase", &json!({ "new_passphrase": "foobarbaz" }));
    assert!(created.get("error_code").is_none(), "{created}");
    let salt = field(&created, "salt").to_string();
    let key = field(&created, "key").to_string();
    let check = field(&created, "check").to_string();
    let internal_key = field(&created, "internal_key").to_string();
    let wrapped = field(&created, "internal_key_encrypted").to_string();
    assert_eq!(salt.len(), 64);
    assert_eq!(internal_key.len(), 64);

    // unlock with the right passphrase
    let unlocked = dispatch(
        "unlock-wallet",
        &json!({
            "salt": salt,
            "check": check,
            "passphrase": "foobarbaz",
            "internal_key_encrypted": wrapped,
        }),
    );
    assert!(unlocked.get("error_code").is_none(), "{unlocked}");
    assert_eq!(field(&unlocked, "key"), key);
    assert_eq!(field(&unlocked, "internal_key"), internal_key);

    // wrong passphrase fails at check decryption
    let wrong = dispatch(
        "unlock-wallet",
        &json!({
            "salt": salt,
            "check": check,
            "passphrase": "wrong",
            "internal_key_encrypted": wrapped,
        }),
    );
    assert_check_rejected(&wrong, "wrong passphrase");

    // wrong salt and wrong check fail the same way
    for (name, value) in [("salt", BAD_HEX), ("check", BAD_HEX)] {
        let mut params = json!({
            "salt": salt,
            "check": check,
            "passphrase": "foobarbaz",
            "internal_key_encrypted": wrapped,
        });
        params[name] = json!(value);
        let reply = dispatch("unlock-wallet", &params);
        assert_check_rejected(&reply, name);
    }

    // encrypt and decrypt an item under the internal key
    let encrypted = dispatch(
        "encrypt-item",
        &json!({ "internal_key": internal_key, "item": "plaintext" }),
    );
    let item_encrypted = field(&encrypted, "item_encrypted").to_string();

    let wrong_key = dispatch(
        "decrypt-item",
        &json!({ "internal_key": BAD_HEX, "item_encrypted": item_encrypted }),
    );
    // either the padding check catches the wrong key, or (rarely) it
    // decodes to some string that cannot be the plaintext
    if wrong_key["error_code"].as_i64() != Some(ERR_KDF_OR_RNG) {
        assert_ne!(field(&wrong_key, "item"), "plaintext");
    }

    let decrypted = dispatch(
        "decrypt-item",
        &json!({ "internal_key": internal_key, "item_encrypted": item_encrypted }),
    );
    assert_eq!(field(&decrypted, "item"), "plaintext");

    // changing the passphrase with wrong credentials fails
    let denied = dispatch(
        "set-passphrase",
        &json!({
            "key": BAD_HEX,
            "check": check,
            "internal_key_encrypted": wrapped,
            "new_passphrase": "New Passphrase",
        }),
    );
    assert_check_rejected(&denied, "stale credentials");

    // changing with good credentials rotates everything but the internal
    // key
    let changed = dispatch(
        "set-passphrase",
        &json!({
            "key": key,
            "check": check,
            "internal_key_encrypted": wrapped,
            "new_passphrase": "New Passphrase",
        }),
    );
    assert!(changed.get("error_code").is_none(), "{changed}");
    assert_eq!(field(&changed, "internal_key"), internal_key);
    assert_ne!(field(&changed, "salt"), salt);
    assert_ne!(field(&changed, "key"), key);
    assert_ne!(field(&changed, "check"), check);
    assert_ne!(field(&changed, "internal_key_encrypted"), wrapped);

    // the new credentials unlock to the same internal key
    let reunlocked = dispatch(
        "unlock-wallet",
        &json!({
            "salt": field(&changed, "salt"),
            "check": field(&changed, "check"),
            "passphrase": "New Passphrase",
            "internal_key_encrypted": field(&changed, "internal_key_encrypted"),
        }),
    );
    assert_eq!(field(&reunlocked, "internal_key"), internal_key);

    // the old item ciphertext still decrypts under the preserved key
    let still_decrypts = dispatch(
        "decrypt-item",
        &json!({
            "internal_key": field(&reunlocked, "internal_key"),
            "item_encrypted": item_encrypted,
        }),
    );
    assert_eq!(field(&still_decrypts, "item"), "plaintext");
}

#[test]
fn test_get_node_from_seed() {
    let reply = dispatch(
        "get-node",
        &json!({ "seed": "000102030405060708090a0b0c0d0e0f" }),
    );
    assert_eq!(
        field(&reply, "ext_prv_b58"),
        "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi"
    );
    assert_eq!(field(&reply, "fingerprint"), "0x3442193e");
}

#[test]
fn test_get_node_with_path() {
    let reply = dispatch(
        "get-node",
        &json!({
            "seed": "000102030405060708090a0b0c0d0e0f",
            "path": "m/0'/1",
        }),
    );
    assert_eq!(field(&reply, "address"), "1JQheacLPdM5ySCkrZkV66G2ApAXe1mqLj");
}

#[test]
fn test_get_node_accepts_every_seed_form() {
    let from_seed = dispatch(
        "get-node",
        &json!({ "seed": "000102030405060708090a0b0c0d0e0f" }),
    );
    let ext_prv_b58 = field(&from_seed, "ext_prv_b58");
    let ext_prv_hex = field(&from_seed, "ext_prv_hex");

    let from_b58 = dispatch("get-node", &json!({ "seed": ext_prv_b58 }));
    let from_hex = dispatch("get-node", &json!({ "seed": ext_prv_hex }));
    for reply in [&from_b58, &from_hex] {
        assert_eq!(field(reply, "ext_prv_b58"), ext_prv_b58);
    }

    // a public extended key yields a reply without private fields
    let ext_pub_b58 = field(&from_seed, "ext_pub_b58");
    let from_pub = dispatch("get-node", &json!({ "seed": ext_pub_b58 }));
    assert_eq!(field(&from_pub, "ext_pub_b58"), ext_pub_b58);
    assert!(from_pub.get("secret_key").is_none());
    assert!(from_pub.get("ext_prv_b58").is_none());
}

#[test]
fn test_get_addresses() {
    let reply = dispatch(
        "get-addresses",
        &json!({
            "seed": "xprv9uHRZZhk6KAJC1avXpDAp4MDc3sQKNxDiPvvkX8Br5ngLNv1TxvUxt4cV1rGL5hj6KCesnDYUhd7oWgT11eZG7XnxHrnYeSvkzY7d2bhkJ7",
            "path": "m/0",
            "start": 0,
            "count": 2,
        }),
    );
    let addresses = reply["addresses"].as_array().unwrap();
    assert_eq!(addresses.len(), 2);
    assert_eq!(addresses[0]["index"], 0);
    assert_eq!(addresses[0]["path"], "m/0/0");
    assert_eq!(addresses[0]["address"], "1BvgsfsZQVtkLS69NvGF8rw6NZW2ShJQHr");
    assert_eq!(
        addresses[0]["key"],
        "L3dzheSvHWc2scJdiikdZmYdFzPcvZMAnT5g62ikVWZdBewoWpL1"
    );
    assert_eq!(addresses[1]["index"], 1);
    assert_eq!(addresses[1]["path"], "m/0/1");
}

#[test]
fn test_get_signed_transaction() {
    let params = json!({
        "ext_prv_b58": "xprv9uHRZZhk6KAJC1avXpDAp4MDc3sQKNxDiPvvkX8Br5ngLNv1TxvUxt4cV1rGL5hj6KCesnDYUhd7oWgT11eZG7XnxHrnYeSvkzY7d2bhkJ7",
        "unspent_txos": [{
            "value": 100_000_000u64,
            "script": "76a91477d896b0f85f72ae0f3d0487c432b23c28b7149388ac",
            "tx_output_n": 262,
            "tx_hash": "47b95fdeff3a20cb72d3ad499f0c34b2bdec16de51a3fcf95e5db57e9d61fb18",
        }],
        "recipients": [{
            "address": "1AnDogBPp4VL48Nrh7h8LquV68ZzXNtwcq",
            "value": 32_767u64,
        }],
        "fee": 255,
        "change_index": 1,
    });
    let reply = dispatch("get-signed-transaction", &params);
    assert!(reply.get("error_code").is_none(), "{reply}");

    let raw = hex::decode(field(&reply, "signed_tx")).unwrap();
    let tx = coffer_tx::Transaction::parse(&raw).unwrap();
    assert_eq!(tx.inputs().len(), 1);
    assert_eq!(tx.outputs().len(), 2);
    assert_eq!(tx.outputs()[0].value, 32_767);
    assert_eq!(tx.outputs()[1].value, 99_966_978);

    // insufficient funds surfaces its own code
    let mut broke = params.clone();
    broke["fee"] = json!(100_000_000u64);
    let reply = dispatch("get-signed-transaction", &broke);
    assert_eq!(reply["error_code"], ERR_INSUFFICIENT_FUNDS);

    // a malformed sending key is rejected up front
    let mut bad = params.clone();
    bad["ext_prv_b58"] = json!("not-an-extended-key");
    let reply = dispatch("get-signed-transaction", &bad);
    assert_eq!(reply["error_code"], ERR_BAD_INPUT);
}

#[test]
fn test_unknown_method_code() {
    let reply = dispatch("report-weather", &json!({}));
    assert_eq!(reply["error_code"], ERR_UNKNOWN_METHOD);
}
