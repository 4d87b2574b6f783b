#[macro_export]
macro_rules! conv_2d {
        ({$builder:expr}$(,)?) => {
            $builder
        };

        ({$builder:expr} , padding=$padding:expr $(, $($rest:tt)*)?) => {
            $crate::conv_2d!({ $builder.with_padding(burn::nn::PaddingConfig2d::Explicit($padding, $padding)) } $(, $($rest)*)?)
        };

        ({$builder:expr} , stride=$stride:expr $(, $($rest:tt)*)?) => {
            $crate::conv_2d!({ $builder.with_stride([$stride, $stride])} $(, $($rest)*)?)
        };

        ({$builder:expr} , bias=$bias:expr $(, $($rest:tt)*)?) => {
            $crate::conv_2d!({ $builder.with_bias($bias)} $(, $($rest)*)?)
        };

        ($c_in:expr, $c_out:expr, kernel_size = $kernel_size:expr $(, $($rest:tt)*)?) => {
            $crate::conv_2d!({burn::nn::conv::Conv2dConfig::new([$c_in, $c_out], [$kernel_size, $kernel_size])} $(, $($rest)*)?)
        };
    }

/// Same as [`conv_2d!`] but builds a `ConvTranspose2dConfig`, whose padding is a plain pair.
#[macro_export]
macro_rules! conv_transpose_2d {
        ({$builder:expr}$(,)?) => {
            $builder
        };

        ({$builder:expr} , padding=$padding:expr $(, $($rest:tt)*)?) => {
            $crate::conv_transpose_2d!({ $builder.with_padding([$padding, $padding]) } $(, $($rest)*)?)
        };

        ({$builder:expr} , stride=$stride:expr $(, $($rest:tt)*)?) => {
            $crate::conv_transpose_2d!({ $builder.with_stride([$stride, $stride])} $(, $($rest)*)?)
        };

        ({$builder:expr} , bias=$bias:expr $(, $($rest:tt)*)?) => {
            $crate::conv_transpose_2d!({ $builder.with_bias($bias)} $(, $($rest)*)?)
        };

        ($c_in:expr, $c_out:expr, kernel_size = $kernel_size:expr $(, $($rest:tt)*)?) => {
            $crate::conv_transpose_2d!({burn::nn::conv::ConvTranspose2dConfig::new([$c_in, $c_out], [$kernel_size, $kernel_size])} $(, $($rest)*)?)
        };
    }
