//! Coffer request surface
//!
//! Stateless method handlers behind [`dispatch`]. Every request and reply
//! is a JSON object; byte fields travel as lowercase hex strings. A
//! failed request answers with `error_code` (negative) and
//! `error_message` instead of result fields.
//!
//! The passphrase methods operate on the material passed in: the caller
//! persists `(salt, check, internal_key_encrypted)` and presents it back,
//! so the surface itself holds no key state between requests.

use std::collections::BTreeMap;

use coffer_core::credentials::PASSPHRASE_CHECK;
use coffer_core::node::EXTENDED_KEY_LEN;
use coffer_core::{address, crypto, derive, Hash160, Node};
use coffer_tx::signer::KeyMaterial;
use coffer_tx::{SignError, TxOut};
use serde_json::{json, Value};
use zeroize::Zeroizing;

pub const ERR_KDF_OR_RNG: i64 = -1;
pub const ERR_CHECK_DECRYPT: i64 = -2;
pub const ERR_CHECK_MISMATCH: i64 = -3;
pub const ERR_INTERNAL_KEY_DECRYPT: i64 = -4;
pub const ERR_REENCRYPT: i64 = -5;
pub const ERR_INSUFFICIENT_FUNDS: i64 = -6;
pub const ERR_KEY_NOT_FOUND: i64 = -7;
pub const ERR_BAD_INPUT: i64 = -8;
pub const ERR_UNKNOWN_METHOD: i64 = -999;

/// Addresses scanned per chain when building the signing map for
/// `get-signed-transaction`.
const SIGNING_SCAN_WINDOW: u32 = 20;

/// Extra caller-supplied seed bytes are appended to this many random
/// bytes by `create-node`.
const GENERATED_SEED_LEN: usize = 32;

/// Route one request to its handler.
pub fn dispatch(method: &str, params: &Value) -> Value {
    log::debug!("dispatching {method}");
    match method {
        "create-node" => create_node(params),
        "get-node" => get_node(params),
        "get-addresses" => get_addresses(params),
        "set-passphrase" => set_passphrase(params),
        "unlock-wallet" => unlock_wallet(params),
        "encrypt-item" => encrypt_item(params),
        "decrypt-item" => decrypt_item(params),
        "get-signed-transaction" => get_signed_transaction(params),
        _ => error_reply(ERR_UNKNOWN_METHOD, "unrecognized method"),
    }
}

pub fn error_reply(code: i64, message: &str) -> Value {
    json!({ "error_code": code, "error_message": message })
}

// ---- field access ----

fn str_field<'a>(params: &'a Value, name: &str) -> &'a str {
    params.get(name).and_then(Value::as_str).unwrap_or("")
}

fn hex_field(params: &Value, name: &str) -> Result<Vec<u8>, Value> {
    hex::decode(str_field(params, name))
        .map_err(|_| error_reply(ERR_BAD_INPUT, &format!("field {name:?} is not valid hex")))
}

fn key_field(params: &Value, name: &str) -> Result<Zeroizing<[u8; 32]>, Value> {
    let bytes = Zeroizing::new(hex_field(params, name)?);
    bytes
        .as_slice()
        .try_into()
        .map(Zeroizing::new)
        .map_err(|_| error_reply(ERR_BAD_INPUT, &format!("field {name:?} must be 32 bytes")))
}

fn u64_field(params: &Value, name: &str, default: u64) -> u64 {
    params.get(name).and_then(Value::as_u64).unwrap_or(default)
}

// ---- node rendering ----

fn node_reply(node: &Node) -> Value {
    let public = node.to_bytes_public();
    let mut reply = json!({
        "hex_id": hex::encode(node.identifier()),
        "fingerprint": format!("{:#010x}", node.fingerprint()),
        "address": address::public_key_to_address(&node.public_key()),
        "public_key": hex::encode(node.public_key()),
        "chain_code": hex::encode(node.chain_code()),
        "ext_pub_hex": hex::encode(public),
        "ext_pub_b58": address::encode_check(&public),
    });
    if let (Some(secret), Some(private)) = (node.secret_key(), node.to_bytes_private()) {
        let fields = reply.as_object_mut().expect("object literal");
        fields.insert("secret_key".into(), json!(hex::encode(secret)));
        fields.insert("secret_wif".into(), json!(address::secret_to_wif(secret)));
        fields.insert("ext_prv_hex".into(), json!(hex::encode(private)));
        fields.insert("ext_prv_b58".into(), json!(address::encode_check(&private)));
    }
    reply
}

/// The `seed` field of node queries: a base58check extended key, a
/// 78-byte extended key in hex, or seed bytes in hex.
fn parent_node(params: &Value) -> Result<Node, Value> {
    let seed = str_field(params, "seed");
    if seed.starts_with('x') {
        return derive::node_from_base58(seed)
            .map_err(|err| error_reply(ERR_BAD_INPUT, &err.to_string()));
    }
    let bytes = Zeroizing::new(
        hex::decode(seed).map_err(|_| error_reply(ERR_BAD_INPUT, "seed is not valid hex"))?,
    );
    let result = if bytes.len() == EXTENDED_KEY_LEN {
        derive::node_from_bytes(&bytes)
    } else {
        derive::master_from_seed(&bytes)
    };
    result.map_err(|err| error_reply(ERR_BAD_INPUT, &err.to_string()))
}

// ---- handlers ----

fn create_node(params: &Value) -> Value {
    match create_node_inner(params) {
        Ok(reply) | Err(reply) => reply,
    }
}

fn create_node_inner(params: &Value) -> Result<Value, Value> {
    let mut seed = Zeroizing::new(crypto::random_bytes(GENERATED_SEED_LEN).map_err(|_| {
        error_reply(
            ERR_KDF_OR_RNG,
            "the random number generator could not produce an unpredictable seed",
        )
    })?);
    seed.extend_from_slice(&hex_field(params, "seed")?);

    let node = derive::master_from_seed(&seed)
        .map_err(|err| error_reply(ERR_BAD_INPUT, &err.to_string()))?;
    Ok(node_reply(&node))
}

fn get_node(params: &Value) -> Value {
    match get_node_inner(params) {
        Ok(reply) | Err(reply) => reply,
    }
}

fn get_node_inner(params: &Value) -> Result<Value, Value> {
    let parent = parent_node(params)?;
    let path = match params.get("path").and_then(Value::as_str) {
        Some(path) => path,
        None => "m",
    };
    let node = derive::derive_path(&parent, path)
        .map_err(|err| error_reply(ERR_BAD_INPUT, &err.to_string()))?;
    Ok(node_reply(&node))
}

fn get_addresses(params: &Value) -> Value {
    match get_addresses_inner(params) {
        Ok(reply) | Err(reply) => reply,
    }
}

fn get_addresses_inner(params: &Value) -> Result<Value, Value> {
    let parent = parent_node(params)?;
    let start = u64_field(params, "start", 0) as u32;
    let count = u64_field(params, "count", 20) as u32;
    let base_path = match params.get("path").and_then(Value::as_str) {
        Some(path) => path,
        None => "m",
    };

    let mut addresses = Vec::with_capacity(count as usize);
    for offset in 0..count {
        let index = start + offset;
        let path = format!("{base_path}/{index}");
        let node = derive::derive_path(&parent, &path)
            .map_err(|err| error_reply(ERR_BAD_INPUT, &err.to_string()))?;
        let mut entry = json!({
            "index": index,
            "path": path,
            "address": address::public_key_to_address(&node.public_key()),
        });
        if let Some(secret) = node.secret_key() {
            entry
                .as_object_mut()
                .expect("object literal")
                .insert("key".into(), json!(address::secret_to_wif(secret)));
        }
        addresses.push(entry);
    }
    Ok(json!({ "addresses": addresses }))
}

fn verify_credentials(
    key: &[u8; 32],
    check: &[u8],
    internal_key_encrypted: &[u8],
) -> Result<Zeroizing<[u8; 32]>, Value> {
    let check_plain = crypto::decrypt(key, check)
        .map_err(|_| error_reply(ERR_CHECK_DECRYPT, "check decryption failed"))?;
    if check_plain != PASSPHRASE_CHECK {
        return Err(error_reply(ERR_CHECK_MISMATCH, "check verification failed"));
    }
    let internal = Zeroizing::new(
        crypto::decrypt(key, internal_key_encrypted)
            .map_err(|_| error_reply(ERR_INTERNAL_KEY_DECRYPT, "internal key decryption failed"))?,
    );
    internal
        .as_slice()
        .try_into()
        .map(Zeroizing::new)
        .map_err(|_| error_reply(ERR_INTERNAL_KEY_DECRYPT, "internal key decryption failed"))
}

fn set_passphrase(params: &Value) -> Value {
    match set_passphrase_inner(params) {
        Ok(reply) | Err(reply) => reply,
    }
}

fn set_passphrase_inner(params: &Value) -> Result<Value, Value> {
    let old_key = hex_field(params, "key")?;
    let old_check = hex_field(params, "check")?;
    let old_wrapped = hex_field(params, "internal_key_encrypted")?;
    let new_passphrase = str_field(params, "new_passphrase");

    // changing an existing passphrase requires proving the old credentials
    let internal_key = if !old_key.is_empty() && !old_check.is_empty() && !old_wrapped.is_empty() {
        let old_key: Zeroizing<[u8; 32]> = Zeroizing::new(
            old_key
                .as_slice()
                .try_into()
                .map_err(|_| error_reply(ERR_BAD_INPUT, "field \"key\" must be 32 bytes"))?,
        );
        verify_credentials(&old_key, &old_check, &old_wrapped)?
    } else {
        let mut fresh = Zeroizing::new([0u8; 32]);
        crypto::fill_random(&mut fresh[..])
            .map_err(|_| error_reply(ERR_KDF_OR_RNG, "random generation failed"))?;
        fresh
    };

    let salt = crypto::random_bytes(32)
        .map_err(|_| error_reply(ERR_KDF_OR_RNG, "random generation failed"))?;
    let key = crypto::derive_key(new_passphrase, &salt)
        .map_err(|_| error_reply(ERR_KDF_OR_RNG, "key derivation failed"))?;
    let check = crypto::encrypt(&key, &PASSPHRASE_CHECK)
        .map_err(|_| error_reply(ERR_REENCRYPT, "check generation failed"))?;
    let internal_key_encrypted = crypto::encrypt(&key, &internal_key[..])
        .map_err(|_| error_reply(ERR_REENCRYPT, "internal key encryption failed"))?;

    Ok(json!({
        "salt": hex::encode(&salt),
        "key": hex::encode(&key[..]),
        "check": hex::encode(&check),
        "internal_key": hex::encode(&internal_key[..]),
        "internal_key_encrypted": hex::encode(&internal_key_encrypted),
    }))
}

fn unlock_wallet(params: &Value) -> Value {
    match unlock_wallet_inner(params) {
        Ok(reply) | Err(reply) => reply,
    }
}

fn unlock_wallet_inner(params: &Value) -> Result<Value, Value> {
    let salt = hex_field(params, "salt")?;
    let check = hex_field(params, "check")?;
    let wrapped = hex_field(params, "internal_key_encrypted")?;
    let passphrase = str_field(params, "passphrase");

    let key = crypto::derive_key(passphrase, &salt)
        .map_err(|_| error_reply(ERR_KDF_OR_RNG, "key derivation failed"))?;
    let internal_key = verify_credentials(&key, &check, &wrapped)?;
    Ok(json!({
        "key": hex::encode(&key[..]),
        "internal_key": hex::encode(&internal_key[..]),
    }))
}

fn encrypt_item(params: &Value) -> Value {
    match encrypt_item_inner(params) {
        Ok(reply) | Err(reply) => reply,
    }
}

fn encrypt_item_inner(params: &Value) -> Result<Value, Value> {
    let internal_key = key_field(params, "internal_key")?;
    let item = str_field(params, "item");
    let item_encrypted = crypto::encrypt(&internal_key, item.as_bytes())
        .map_err(|_| error_reply(ERR_KDF_OR_RNG, "encryption failed"))?;
    Ok(json!({ "item_encrypted": hex::encode(item_encrypted) }))
}

fn decrypt_item(params: &Value) -> Value {
    match decrypt_item_inner(params) {
        Ok(reply) | Err(reply) => reply,
    }
}

fn decrypt_item_inner(params: &Value) -> Result<Value, Value> {
    let internal_key = key_field(params, "internal_key")?;
    let item_encrypted = hex_field(params, "item_encrypted")?;
    let item_bytes = crypto::decrypt(&internal_key, &item_encrypted)
        .map_err(|_| error_reply(ERR_KDF_OR_RNG, "decryption failed"))?;
    let item = String::from_utf8(item_bytes)
        .map_err(|_| error_reply(ERR_KDF_OR_RNG, "decryption failed"))?;
    Ok(json!({ "item": item }))
}

fn get_signed_transaction(params: &Value) -> Value {
    match get_signed_transaction_inner(params) {
        Ok(reply) | Err(reply) => reply,
    }
}

fn get_signed_transaction_inner(params: &Value) -> Result<Value, Value> {
    let ext_prv_b58 = str_field(params, "ext_prv_b58");
    if !ext_prv_b58.starts_with('x') {
        return Err(error_reply(ERR_BAD_INPUT, "ext_prv_b58 is not an extended key"));
    }
    let sending_node = derive::node_from_base58(ext_prv_b58)
        .map_err(|err| error_reply(ERR_BAD_INPUT, &err.to_string()))?;

    let mut unspent = Vec::new();
    for entry in params
        .get("unspent_txos")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        let script = hex_field(entry, "script")?;
        let tx_hash: [u8; 32] = hex_field(entry, "tx_hash")?
            .as_slice()
            .try_into()
            .map_err(|_| error_reply(ERR_BAD_INPUT, "tx_hash must be 32 bytes"))?;
        unspent.push(TxOut::unspent(
            u64_field(entry, "value", 0),
            script,
            u64_field(entry, "tx_output_n", 0) as u32,
            tx_hash,
        ));
    }

    let mut recipients = Vec::new();
    for entry in params
        .get("recipients")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        let hash160 = address::address_to_hash160(str_field(entry, "address"))
            .map_err(|err| error_reply(ERR_BAD_INPUT, &err.to_string()))?;
        recipients.push(TxOut::to_address(u64_field(entry, "value", 0), &hash160));
    }

    let fee = u64_field(params, "fee", 0);
    let change_index = u64_field(params, "change_index", 0) as u32;
    let change_node = derive::derive_path(&sending_node, &format!("m/0/{change_index}"))
        .map_err(|err| error_reply(ERR_BAD_INPUT, &err.to_string()))?;
    let change_address = crypto::hash160(&change_node.public_key());

    let keys = scan_signing_keys(&sending_node)
        .map_err(|err| error_reply(ERR_BAD_INPUT, &err.to_string()))?;
    let signed = coffer_tx::sign_transaction(&keys, &unspent, &recipients, &change_address, fee)
        .map_err(|err| match err {
            SignError::InsufficientFunds => {
                error_reply(ERR_INSUFFICIENT_FUNDS, &err.to_string())
            }
            SignError::KeyNotFound => error_reply(ERR_KEY_NOT_FOUND, &err.to_string()),
            other => error_reply(ERR_BAD_INPUT, &other.to_string()),
        })?;
    Ok(json!({ "signed_tx": hex::encode(signed) }))
}

/// Walk the external and change chains of `node`, collecting key pairs
/// for the signer.
fn scan_signing_keys(
    node: &Node,
) -> Result<BTreeMap<Hash160, KeyMaterial>, derive::DeriveError> {
    let mut keys = BTreeMap::new();
    for chain in 0..2u32 {
        for index in 0..SIGNING_SCAN_WINDOW {
            let child = derive::derive_path(node, &format!("m/{chain}/{index}"))?;
            let Some(secret) = child.secret_key() else {
                continue;
            };
            keys.insert(
                crypto::hash160(&child.public_key()),
                KeyMaterial {
                    public_key: child.public_key(),
                    secret_key: Zeroizing::new(*secret),
                },
            );
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_method() {
        let reply = dispatch("mine-bitcoins", &json!({}));
        assert_eq!(reply["error_code"], ERR_UNKNOWN_METHOD);
        assert!(reply["error_message"].is_string());
    }

    #[test]
    fn test_bad_hex_rejected() {
        let reply = dispatch("get-node", &json!({ "seed": "zz" }));
        assert_eq!(reply["error_code"], ERR_BAD_INPUT);
    }

    #[test]
    fn test_create_node_has_private_fields() {
        let reply = dispatch("create-node", &json!({}));
        assert!(reply.get("error_code").is_none(), "{reply}");
        assert!(reply["ext_prv_b58"].as_str().unwrap().starts_with("xprv"));
        assert!(reply["ext_pub_b58"].as_str().unwrap().starts_with("xpub"));
        assert_eq!(reply["hex_id"].as_str().unwrap().len(), 40);
        assert!(reply["fingerprint"].as_str().unwrap().starts_with("0x"));
    }

    #[test]
    fn test_create_node_mixes_supplied_seed() {
        // two calls with the same extra seed still differ (random prefix)
        let a = dispatch("create-node", &json!({ "seed": "00" }));
        let b = dispatch("create-node", &json!({ "seed": "00" }));
        assert_ne!(a["ext_prv_b58"], b["ext_prv_b58"]);
    }
}
