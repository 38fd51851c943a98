//! ABI fragments for the stablecoin and the sale contract.
//!
//! Calls are encoded with [`SolCall::abi_encode`] and dispatched as raw
//! calldata through whichever [`ChainClient`](super::ChainClient) is in use.

use alloy::primitives::{Bytes, U256};
use alloy::sol_types::SolCall;

use super::{ChainError, ReadCall, ReadFunction, WriteCall};

/// Minimal ERC-20 and sale ABI fragments.
mod abi {
    alloy::sol! {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);

        function PRICE_PER_TOKEN() external view returns (uint256);
        function getAvailableTokens() external view returns (uint256);
        function buyTokens(uint256 tokenAmount) external;
    }
}

/// Encode the calldata for a read call.
///
/// # Errors
///
/// Returns a decode error naming "invalid arguments" when the argument count
/// does not match the function.
pub fn encode_read(call: &ReadCall) -> Result<Bytes, ChainError> {
    if call.args.len() != call.function.arity() {
        return Err(ChainError::decode(format!(
            "invalid arguments for {}: expected {}, got {}",
            call.function,
            call.function.arity(),
            call.args.len()
        )));
    }

    let data = match call.function {
        ReadFunction::PricePerToken => abi::PRICE_PER_TOKENCall {}.abi_encode(),
        ReadFunction::AvailableTokens => abi::getAvailableTokensCall {}.abi_encode(),
        ReadFunction::BalanceOf => abi::balanceOfCall {
            owner: call.args[0],
        }
        .abi_encode(),
        ReadFunction::Allowance => abi::allowanceCall {
            owner: call.args[0],
            spender: call.args[1],
        }
        .abi_encode(),
    };
    Ok(Bytes::from(data))
}

/// Decode the return data of a read call.
///
/// # Errors
///
/// Returns an error if the data does not decode as a `uint256`.
pub fn decode_read(function: ReadFunction, data: &[u8]) -> Result<U256, ChainError> {
    let decoded = match function {
        ReadFunction::PricePerToken => abi::PRICE_PER_TOKENCall::abi_decode_returns(data),
        ReadFunction::AvailableTokens => abi::getAvailableTokensCall::abi_decode_returns(data),
        ReadFunction::BalanceOf => abi::balanceOfCall::abi_decode_returns(data),
        ReadFunction::Allowance => abi::allowanceCall::abi_decode_returns(data),
    };
    decoded.map_err(|e| ChainError::decode(format!("{function} decode failed: {e}")))
}

/// Encode the calldata for a write call.
#[must_use]
pub fn encode_write(call: &WriteCall) -> Bytes {
    let data = match *call {
        WriteCall::Approve {
            spender, amount, ..
        } => abi::approveCall { spender, amount }.abi_encode(),
        WriteCall::BuyTokens { amount, .. } => abi::buyTokensCall {
            tokenAmount: amount,
        }
        .abi_encode(),
    };
    Bytes::from(data)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use alloy::primitives::{Address, address};
    use alloy::sol_types::SolValue;

    use super::*;

    const USDT: Address = address!("0xdAC17F958D2ee523a2206206994597C13D831ec7");
    const USER: Address = address!("0x3000000000000000000000000000000000000003");

    #[test]
    fn selectors_match_the_abi() {
        let balance = encode_read(&ReadCall::balance_of(USDT, USER)).unwrap();
        assert_eq!(&balance[..4], &[0x70, 0xa0, 0x82, 0x31]);

        let approve = encode_write(&WriteCall::Approve {
            token: USDT,
            spender: USER,
            amount: U256::ZERO,
        });
        assert_eq!(&approve[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(approve.len(), 4 + 64);
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let call = ReadCall {
            contract: USDT,
            function: ReadFunction::Allowance,
            args: vec![USER],
        };
        let err = encode_read(&call).unwrap_err();
        assert!(err.to_string().contains("invalid arguments"));
    }

    #[test]
    fn decodes_uint256_return() {
        let data = U256::from(2_000_000u64).abi_encode();
        let value = decode_read(ReadFunction::PricePerToken, &data).unwrap();
        assert_eq!(value, U256::from(2_000_000u64));
    }

    #[test]
    fn empty_return_data_is_a_decode_error() {
        let err = decode_read(ReadFunction::BalanceOf, &[]).unwrap_err();
        assert!(matches!(err, ChainError::Decode(_)));
    }
}
